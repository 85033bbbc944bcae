//! Tests for the k-point UHF components

use super::*;
use crate::cell::Cell;
use crate::diagnostics::{Diagnostic, RecordingSink};
use crate::error::KscfError;
use crate::io::checkpoint::{ChkOrbitals, ScfRecord};
use crate::linalg::{c64, eigh, hermiticity_error, CMatrix, SpinKpts};
use crate::model::LatticeModel;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use num_complex::Complex64;
use std::sync::Arc;

/// Deterministic Hermitian matrix with complex off-diagonal elements.
fn hermitian(n: usize, seed: f64) -> CMatrix {
    let a = CMatrix::from_fn(n, n, |i, j| {
        let x = (i * n + j) as f64 + seed;
        Complex64::new((1.3 * x).sin(), (0.7 * x).cos())
    });
    let mut h = (&a + a.adjoint()) * c64(0.5);
    for i in 0..n {
        h[(i, i)] += c64(i as f64);
    }
    h
}

/// Orthonormal orbitals (eigenvectors of a Hermitian matrix).
fn orbitals(n: usize, seed: f64) -> CMatrix {
    eigh(&hermitian(n, seed)).1
}

fn occupation(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

fn chain_cell(nelectron: usize, spin: usize) -> Cell {
    Cell::new(Matrix3::from_diagonal(&Vector3::new(4.0, 10.0, 10.0)), nelectron, spin)
        .with_natm(2)
}

/// Two-site chain with nearest-neighbour hopping inside and across cells.
fn chain_model(u: f64) -> LatticeModel {
    LatticeModel::new(vec![0.0, 0.0])
        .with_hubbard_u(vec![u, u])
        .with_hopping(0, 1, [0, 0, 0], -1.0)
        .with_hopping(1, 0, [1, 0, 0], -0.5)
}

fn max_abs_diff(a: &SpinKpts<CMatrix>, b: &SpinKpts<CMatrix>) -> f64 {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .map(|(x, y)| (x - y).camax())
        .fold(0.0, f64::max)
}

#[test]
fn test_make_rdm1_is_hermitian() {
    let c = [
        vec![orbitals(4, 0.0), orbitals(4, 1.0)],
        vec![orbitals(4, 2.0), orbitals(4, 3.0)],
    ];
    let occ = [
        vec![occupation(&[1.0, 1.0, 0.0, 0.0]), occupation(&[1.0, 0.0, 0.0, 0.0])],
        vec![occupation(&[1.0, 0.0, 0.0, 0.0]), occupation(&[1.0, 0.0, 0.0, 0.0])],
    ];
    let dm = make_rdm1(&c, &occ).unwrap();
    for d in dm.iter().flatten() {
        assert!(hermiticity_error(d) < 1e-10);
    }
    // Orthonormal orbitals: tr(D) counts the electrons
    let ne: f64 = dm[0].iter().map(|d| d.trace().re).sum();
    assert!((ne - 3.0).abs() < 1e-10);
}

#[test]
fn test_make_rdm1_shape_mismatch() {
    let c = [vec![orbitals(3, 0.0)], vec![orbitals(3, 1.0)]];
    let occ = [vec![occupation(&[1.0, 0.0])], vec![occupation(&[1.0, 0.0, 0.0])]];
    let err = make_rdm1(&c, &occ).unwrap_err();
    assert!(matches!(err, KscfError::Shape { .. }));
}

#[test]
fn test_two_kpoint_fermi_filling() {
    let sink = RecordingSink::new();
    let energies = vec![
        occupation(&[-1.0, -0.5, 0.3, 1.0]),
        occupation(&[-0.8, -0.2, 0.1, 2.0]),
    ];
    let mo_energy = [energies.clone(), energies];
    let scaled = vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)];
    let occ = get_occ((2, 2), &mo_energy, &scaled, &sink).unwrap();

    for s in 0..2 {
        let total: f64 = occ[s].iter().map(|o| o.sum()).sum();
        assert_eq!(total, 4.0);
        assert_eq!(occ[s][0].as_slice(), &[1.0, 1.0, 0.0, 0.0]);
        assert_eq!(occ[s][1].as_slice(), &[1.0, 1.0, 0.0, 0.0]);
    }
    assert_eq!(sink.fermi_level(Spin::Alpha), Some(-0.2));
    assert_eq!(sink.fermi_level(Spin::Beta), Some(-0.2));
    let orbital_tables = sink
        .events()
        .into_iter()
        .filter(|d| matches!(d, Diagnostic::OrbitalEnergies { .. }))
        .count();
    assert_eq!(orbital_tables, 4);
}

#[test]
fn test_fermi_level_shared_across_kpoints() {
    // All four alpha electrons end up at the deep k-point
    let energies = vec![
        occupation(&[-3.0, -2.5, -2.0, -1.5]),
        occupation(&[1.0, 2.0, 3.0, 4.0]),
    ];
    let filling = fermi_filling(&energies, 4).unwrap();
    assert_eq!(filling.mo_occ[0].sum(), 4.0);
    assert_eq!(filling.mo_occ[1].sum(), 0.0);
    assert_eq!(filling.homo, -1.5);
    assert_eq!(filling.lumo, Some(1.0));
}

#[test]
fn test_empty_beta_channel() {
    let sink = RecordingSink::new();
    let energies = vec![occupation(&[-1.0, 0.5])];
    let mo_energy = [energies.clone(), energies];
    let occ = get_occ((1, 0), &mo_energy, &[Vector3::zeros()], &sink).unwrap();
    assert_eq!(occ[0][0].as_slice(), &[1.0, 0.0]);
    assert_eq!(occ[1][0].as_slice(), &[0.0, 0.0]);
    assert_eq!(sink.fermi_level(Spin::Beta), None);
}

#[test]
fn test_degenerate_fermi_level_is_reported() {
    let sink = RecordingSink::new();
    let energies = vec![occupation(&[-1.0, 0.0]), occupation(&[0.0, 1.0])];
    let mo_energy = [energies.clone(), energies];
    let scaled = vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)];
    // Two alpha electrons over two k-points; the Fermi level 0.0 is shared
    // by one orbital at each k-point
    let occ = get_occ((1, 0), &mo_energy, &scaled, &sink).unwrap();
    assert_eq!(occ[0].iter().map(|o| o.sum()).sum::<f64>(), 3.0);
    assert!(sink.events().contains(&Diagnostic::DegenerateFermiLevel {
        spin: Spin::Alpha,
        expected: 2,
        assigned: 3,
    }));
}

#[test]
fn test_too_many_electrons() {
    let energies = vec![occupation(&[-1.0, 0.0])];
    assert!(fermi_filling(&energies, 3).is_err());
}

#[test]
fn test_energy_elec_is_deterministic() {
    let sink = RecordingSink::new();
    let h = vec![hermitian(3, 0.0), hermitian(3, 1.0)];
    let c = [
        vec![orbitals(3, 2.0), orbitals(3, 3.0)],
        vec![orbitals(3, 4.0), orbitals(3, 5.0)],
    ];
    let occ = [
        vec![occupation(&[1.0, 0.0, 0.0]); 2],
        vec![occupation(&[1.0, 0.0, 0.0]); 2],
    ];
    let dm = make_rdm1(&c, &occ).unwrap();
    let vhf = [
        vec![hermitian(3, 6.0), hermitian(3, 7.0)],
        vec![hermitian(3, 8.0), hermitian(3, 9.0)],
    ];
    let (e1, ec1) = energy_elec(&dm, &h, &vhf, &sink).unwrap();
    let (e2, ec2) = energy_elec(&dm, &h, &vhf, &sink).unwrap();
    assert_eq!(e1, e2);
    assert_eq!(ec1, ec2);

    let mut expected_coul = 0.0;
    for s in 0..2 {
        for k in 0..2 {
            expected_coul += (&dm[s][k] * &vhf[s][k]).trace().re * 0.5;
        }
    }
    assert!((ec1 - expected_coul / 2.0).abs() < 1e-12);
    assert!(matches!(sink.events().last(), Some(Diagnostic::CoulombEnergy(_))));
}

#[test]
fn test_imaginary_coulomb_energy_is_fatal() {
    let sink = RecordingSink::new();
    let n = 2;
    let dm = [vec![CMatrix::identity(n, n)], vec![CMatrix::identity(n, n)]];
    let h = vec![CMatrix::identity(n, n)];
    // Anti-Hermitian potential
    let v = CMatrix::identity(n, n) * Complex64::new(0.0, 1.0);
    let vhf = [vec![v.clone()], vec![v]];
    let err = energy_elec(&dm, &h, &vhf, &sink).unwrap_err();
    match err {
        KscfError::ImaginaryEnergy(im) => assert!((im - 2.0).abs() < 1e-12),
        other => panic!("expected imaginary energy error, got {:?}", other),
    }
    assert!(sink.events().is_empty());
}

#[test]
fn test_canonicalize_preserves_density() {
    let c = [
        vec![orbitals(4, 0.0), orbitals(4, 1.0)],
        vec![orbitals(4, 2.0), orbitals(4, 3.0)],
    ];
    let occ = [
        vec![occupation(&[1.0, 1.0, 0.0, 0.0]); 2],
        vec![occupation(&[1.0, 0.0, 0.0, 0.0]); 2],
    ];
    let fock = [
        vec![hermitian(4, 10.0), hermitian(4, 11.0)],
        vec![hermitian(4, 12.0), hermitian(4, 13.0)],
    ];
    let dm = make_rdm1(&c, &occ).unwrap();
    let (mo_energy, mo_coeff) = canonicalize(&c, &occ, &fock).unwrap();
    let dm_new = make_rdm1(&mo_coeff, &occ).unwrap();
    assert!(max_abs_diff(&dm, &dm_new) < 1e-10);

    // Fock is diagonal inside the occupied block, with the returned energies
    let cocc = mo_coeff[0][0].columns(0, 2).into_owned();
    let f_occ = cocc.adjoint() * &fock[0][0] * &cocc;
    assert!(f_occ[(0, 1)].norm() < 1e-10);
    assert!((f_occ[(0, 0)].re - mo_energy[0][0][0]).abs() < 1e-10);
    assert!(mo_energy[0][0][0] <= mo_energy[0][0][1]);
}

#[test]
fn test_level_shift_raises_virtuals() {
    let h = hermitian(4, 0.5);
    let s = CMatrix::identity(4, 4);
    let (e, c) = eigh(&h);
    let d = make_rdm1_kpt(&c, &occupation(&[1.0, 1.0, 0.0, 0.0])).unwrap();
    let shifted = level_shift(&s, &d, &h, 0.3);
    let (e_shifted, _) = eigh(&shifted);
    let mut expected = vec![e[0], e[1], e[2] + 0.3, e[3] + 0.3];
    expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
    for (a, b) in e_shifted.iter().zip(&expected) {
        assert!((a - b).abs() < 1e-10);
    }
}

#[test]
fn test_get_fock_per_spin_level_shift() {
    let h1e = vec![hermitian(3, 0.0)];
    let s1e = vec![CMatrix::identity(3, 3)];
    let vhf = [vec![CMatrix::zeros(3, 3)], vec![CMatrix::zeros(3, 3)]];
    let dm = [vec![CMatrix::zeros(3, 3)], vec![CMatrix::zeros(3, 3)]];
    let opts = FockOptions {
        level_shift: LevelShift::PerSpin([0.5, 0.0]),
        ..FockOptions::default()
    };
    let fock = get_fock(&h1e, &s1e, &vhf, &dm, None, None, None, &opts).unwrap();
    // Empty density: the whole space is virtual and shifted for alpha only
    let diff_a = &fock[0][0] - &h1e[0];
    assert!((diff_a - CMatrix::identity(3, 3) * c64(0.5)).camax() < 1e-12);
    assert!((&fock[1][0] - &h1e[0]).camax() < 1e-12);
}

#[test]
fn test_damping_mixes_previous_fock() {
    let h1e = vec![hermitian(2, 0.0)];
    let s1e = vec![CMatrix::identity(2, 2)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];
    let dm = vhf.clone();
    let last = [vec![CMatrix::identity(2, 2)], vec![CMatrix::identity(2, 2)]];
    let opts = FockOptions {
        diis_start_cycle: 3,
        damp: 0.25,
        ..FockOptions::default()
    };

    let damped = get_fock(&h1e, &s1e, &vhf, &dm, Some(0), None, Some(&last), &opts).unwrap();
    let expected = &h1e[0] * c64(0.75) + &last[0][0] * c64(0.25);
    assert!((&damped[0][0] - expected).camax() < 1e-12);

    // No damping once cycle + 1 reaches diis_start_cycle
    let plain = get_fock(&h1e, &s1e, &vhf, &dm, Some(2), None, Some(&last), &opts).unwrap();
    assert!((&plain[0][0] - &h1e[0]).camax() < 1e-12);
}

#[test]
fn test_damping_outside_window_is_reported() {
    let sink = Arc::new(RecordingSink::new());
    let cell = chain_cell(2, 0);
    let kpts = cell.make_kpts([2, 1, 1]);
    let mut mf = KUHF::new(cell, kpts, chain_model(1.0)).with_sink(sink.clone());
    mf.damp = 0.3;
    assert!(mf.fock_options().damping_ignored());
    mf.dump_flags();
    assert!(sink.events().contains(&Diagnostic::DampingIgnored {
        damp: 0.3,
        diis_start_cycle: 1,
    }));

    let sink = Arc::new(RecordingSink::new());
    mf = mf.with_sink(sink.clone());
    mf.diis_start_cycle = 3;
    assert!(!mf.fock_options().damping_ignored());
    mf.dump_flags();
    assert!(sink.events().is_empty());
}

/// Extrapolator that records how often it was consulted.
#[derive(Default)]
struct CountingExtrapolator {
    calls: usize,
}

impl Extrapolator for CountingExtrapolator {
    fn update(
        &mut self,
        _s1e: &[CMatrix],
        _dm: &SpinKpts<CMatrix>,
        fock: SpinKpts<CMatrix>,
        _h1e: &[CMatrix],
        _vhf: &SpinKpts<CMatrix>,
    ) -> crate::error::Result<SpinKpts<CMatrix>> {
        self.calls += 1;
        Ok(fock)
    }

    fn reset(&mut self) {
        self.calls = 0;
    }
}

#[test]
fn test_extrapolator_starts_at_diis_start_cycle() {
    let h1e = vec![hermitian(2, 0.0)];
    let s1e = vec![CMatrix::identity(2, 2)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];
    let dm = vhf.clone();
    let opts = FockOptions {
        diis_start_cycle: 2,
        ..FockOptions::default()
    };
    let mut diis = CountingExtrapolator::default();
    for cycle in 0..4 {
        get_fock(&h1e, &s1e, &vhf, &dm, Some(cycle), Some(&mut diis), None, &opts).unwrap();
    }
    assert_eq!(diis.calls, 2);
    get_fock(&h1e, &s1e, &vhf, &dm, None, Some(&mut diis), None, &opts).unwrap();
    assert_eq!(diis.calls, 2);
}

#[test]
fn test_kdiis_history() {
    let s1e = vec![CMatrix::identity(2, 2)];
    let dm = [
        vec![make_rdm1_kpt(&orbitals(2, 0.0), &occupation(&[1.0, 0.0])).unwrap()],
        vec![CMatrix::zeros(2, 2)],
    ];
    let h1e = vec![hermitian(2, 1.0)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];

    let mut diis = KDiis::new(2);
    let f1 = [vec![hermitian(2, 2.0)], vec![hermitian(2, 3.0)]];
    let out = diis.update(&s1e, &dm, f1.clone(), &h1e, &vhf).unwrap();
    // A single vector cannot be extrapolated
    assert_eq!(out, f1);
    assert_eq!(diis.size(), 1);

    let f2 = [vec![hermitian(2, 4.0)], vec![hermitian(2, 5.0)]];
    diis.update(&s1e, &dm, f2, &h1e, &vhf).unwrap();
    let f3 = [vec![hermitian(2, 6.0)], vec![hermitian(2, 7.0)]];
    diis.update(&s1e, &dm, f3, &h1e, &vhf).unwrap();
    assert_eq!(diis.size(), 2);
    assert!(diis.last_error_norm().unwrap() > 0.0);

    diis.reset();
    assert_eq!(diis.size(), 0);
}

/// Density `diag(1, 0)` and an off-diagonal coupling that does not commute
/// with it, shared by the extrapolation tests.
fn diis_fixture() -> (Vec<CMatrix>, SpinKpts<CMatrix>, CMatrix, CMatrix) {
    let s1e = vec![CMatrix::identity(2, 2)];
    let d = CMatrix::from_diagonal(&DVector::from_vec(vec![c64(1.0), c64(0.0)]));
    let coupling = CMatrix::from_row_slice(2, 2, &[c64(0.0), c64(1.0), c64(1.0), c64(0.0)]);
    let dm = [vec![d.clone()], vec![d.clone()]];
    (s1e, dm, d, coupling)
}

#[test]
fn test_kdiis_cancels_opposite_errors() {
    let (s1e, dm, d, coupling) = diis_fixture();
    let h1e = vec![CMatrix::zeros(2, 2)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];

    // F1 = D + A and F2 = D - A have commutator errors e and -e, so the
    // minimal error combination is (F1 + F2) / 2 = D
    let f1 = &d + &coupling;
    let f2 = &d - &coupling;
    let mut diis = KDiis::new(4);
    diis.update(&s1e, &dm, [vec![f1.clone()], vec![f1.clone()]], &h1e, &vhf)
        .unwrap();
    let out = diis
        .update(&s1e, &dm, [vec![f2.clone()], vec![f2.clone()]], &h1e, &vhf)
        .unwrap();

    let average = (&f1 + &f2) * c64(0.5);
    assert!((&out[0][0] - &average).camax() < 1e-12);
    assert!((&out[1][0] - &average).camax() < 1e-12);
    assert!((&out[0][0] - &d).camax() < 1e-12);
}

#[test]
fn test_kdiis_keeps_newest_fock_without_error() {
    let (s1e, _, d, coupling) = diis_fixture();
    let h1e = vec![CMatrix::zeros(2, 2)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];
    let empty = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];

    // A zero density commutes with everything
    let mut diis = KDiis::new(4);
    let f1 = [vec![&d + &coupling], vec![&d + &coupling]];
    let f2 = [vec![&d - &coupling], vec![&d - &coupling]];
    diis.update(&s1e, &empty, f1, &h1e, &vhf).unwrap();
    let out = diis.update(&s1e, &empty, f2.clone(), &h1e, &vhf).unwrap();
    assert_eq!(diis.size(), 2);
    assert_eq!(out, f2);
}

#[test]
fn test_kdiis_singular_subspace_returns_raw_fock() {
    let (s1e, dm, d, coupling) = diis_fixture();
    let h1e = vec![CMatrix::zeros(2, 2)];
    let vhf = [vec![CMatrix::zeros(2, 2)], vec![CMatrix::zeros(2, 2)]];

    // D commutes with D, so both steps carry the same error vector
    let f1 = &d + &coupling;
    let f2 = &d * c64(2.0) + &coupling;
    let mut diis = KDiis::new(4);
    diis.update(&s1e, &dm, [vec![f1.clone()], vec![f1]], &h1e, &vhf)
        .unwrap();
    let newest = [vec![f2.clone()], vec![f2]];
    let out = diis.update(&s1e, &dm, newest.clone(), &h1e, &vhf).unwrap();
    assert_eq!(out, newest);
}

#[test]
fn test_replicate_guess_breaks_spin_symmetry() {
    let d = DMatrix::identity(2, 2);
    let dm = replicate_guess(&[d.clone(), d], 3);
    assert_eq!(dm[0].len(), 3);
    assert!((dm[0][2][(0, 0)].re - 1.01).abs() < 1e-15);
    assert!((dm[1][1][(1, 1)].re - 0.99).abs() < 1e-15);
}

#[test]
fn test_normalize_electron_count() {
    let sink = RecordingSink::new();
    let s1e = vec![CMatrix::identity(2, 2); 2];
    let mut dm = replicate_guess(&[DMatrix::identity(2, 2), DMatrix::identity(2, 2) * 0.5], 2);
    let rescaled = normalize_electron_count(&mut dm, &s1e, (1, 1), &sink).unwrap();
    assert!(rescaled);
    for s in 0..2 {
        for d in &dm[s] {
            assert!((d.trace().re - 1.0).abs() < 1e-12);
        }
    }
    assert!(matches!(
        sink.events().as_slice(),
        [Diagnostic::ElectronCountMismatch { .. }]
    ));

    let again = normalize_electron_count(&mut dm, &s1e, (1, 1), &sink).unwrap();
    assert!(!again);
}

#[test]
fn test_init_guess_keys() {
    assert_eq!(InitGuess::from_key("1E"), InitGuess::OneElectron);
    assert_eq!(InitGuess::from_key("atom"), InitGuess::Atom);
    assert_eq!(InitGuess::from_key("chkfile"), InitGuess::Chk);
    assert_eq!(InitGuess::from_key("huckel"), InitGuess::Minao);
}

fn unrestricted_record(chk_kpts: Vec<Vector3<f64>>) -> ScfRecord {
    let nk = chk_kpts.len();
    let mo_a: Vec<CMatrix> = (0..nk).map(|k| orbitals(2, k as f64)).collect();
    let mo_b: Vec<CMatrix> = (0..nk).map(|k| orbitals(2, 10.0 + k as f64)).collect();
    let occ_a = vec![occupation(&[1.0, 0.0]); nk];
    let occ_b = vec![occupation(&[1.0, 0.0]); nk];
    ScfRecord {
        e_tot: Some(-1.0),
        kpts: Some(chk_kpts.clone()),
        chk_kpts,
        orbitals: ChkOrbitals::Unrestricted {
            mo_coeff: [mo_a, mo_b],
            mo_occ: [occ_a, occ_b],
        },
    }
}

#[test]
fn test_exact_mesh_projection_equals_make_rdm1() {
    let cell = chain_cell(2, 0);
    let model = chain_model(1.0);
    let kpts = cell.make_kpts([2, 1, 1]);
    let record = unrestricted_record(kpts.clone());
    assert_eq!(
        ProjectionStrategy::select(&record.chk_kpts, &kpts).unwrap(),
        ProjectionStrategy::ExactMesh
    );

    let (mo, occ) = record.orbitals.clone().into_spin_orbitals();
    let expected = make_rdm1(&mo, &occ).unwrap();
    let dm = project_chk_density(&model, &cell, record, &cell, &kpts, true).unwrap();
    assert!(max_abs_diff(&dm, &expected) < 1e-14);
}

#[test]
fn test_nearest_mesh_projection() {
    let cell = chain_cell(2, 0);
    let model = chain_model(1.0);
    let chk_kpts = cell.make_kpts([2, 1, 1]);
    let kpts = cell.make_kpts([4, 1, 1]);
    let strategy = ProjectionStrategy::select(&chk_kpts, &kpts).unwrap();
    match &strategy {
        ProjectionStrategy::NearestMesh { nearest, dkpts } => {
            // 0 -> 0, 1/4 ties between 0 and 1/2 and takes the first, 1/2 -> 1/2
            assert_eq!(nearest[..3], [0, 0, 1]);
            assert!(dkpts[0].norm() < 1e-14);
            assert!((dkpts[1] + kpts[1]).norm() < 1e-14);
        }
        other => panic!("expected nearest-mesh strategy, got {:?}", other),
    }

    let record = unrestricted_record(chk_kpts);
    let (mo, occ) = record.orbitals.clone().into_spin_orbitals();
    let dm = project_chk_density(&model, &cell, record, &cell, &kpts, false).unwrap();
    assert_eq!(dm[0].len(), 4);
    let at_gamma = make_rdm1_kpt(&mo[0][0], &occ[0][0]).unwrap();
    assert!((&dm[0][1] - at_gamma).camax() < 1e-14);
}

#[test]
fn test_gamma_only_guess_is_real() {
    let cell = chain_cell(2, 0);
    let model = chain_model(1.0);
    let record = unrestricted_record(vec![Vector3::zeros()]);
    let dm = project_chk_density(&model, &cell, record, &cell, &[Vector3::zeros()], true).unwrap();
    for d in dm.iter().flatten() {
        assert!(d.iter().all(|z| z.im == 0.0));
    }
}

#[test]
fn test_restricted_checkpoint_split() {
    let cell = chain_cell(2, 0);
    let model = chain_model(1.0);
    let c = orbitals(2, 0.0);
    let record = ScfRecord {
        e_tot: None,
        kpts: None,
        chk_kpts: vec![Vector3::zeros()],
        orbitals: ChkOrbitals::Restricted {
            mo_coeff: vec![c.clone()],
            mo_occ: vec![occupation(&[2.0, 0.0])],
        },
    };
    let dm = project_chk_density(&model, &cell, record, &cell, &[Vector3::zeros()], true).unwrap();
    let expected = make_rdm1_kpt(&c, &occupation(&[1.0, 0.0])).unwrap();
    assert!((&dm[0][0] - expected.map(|z| c64(z.re))).camax() < 1e-14);
    assert!((&dm[0][0] - &dm[1][0]).camax() < 1e-14);
}

#[test]
fn test_veff_is_opposite_spin_hubbard_potential() {
    let cell = chain_cell(2, 0);
    let kpts = cell.make_kpts([2, 1, 1]);
    let mf = KUHF::new(cell, kpts, chain_model(2.0));
    let n = 2;
    let dm = [
        vec![CMatrix::from_diagonal(&DVector::from_vec(vec![c64(1.0), c64(0.0)])); n],
        vec![CMatrix::from_diagonal(&DVector::from_vec(vec![c64(0.0), c64(1.0)])); n],
    ];
    let veff = mf.get_veff(&dm, None).unwrap();
    // Alpha electrons see the beta density on site 1 and vice versa
    assert!((veff[0][0][(0, 0)].re - 0.0).abs() < 1e-12);
    assert!((veff[0][0][(1, 1)].re - 2.0).abs() < 1e-12);
    assert!((veff[1][1][(0, 0)].re - 2.0).abs() < 1e-12);
    assert!((veff[1][1][(1, 1)].re - 0.0).abs() < 1e-12);
}

#[test]
fn test_spin_square() {
    let cell = chain_cell(2, 0);
    let mf = KUHF::new(cell, vec![Vector3::zeros()], chain_model(1.0));
    let s1e = vec![CMatrix::identity(2, 2)];
    let c = CMatrix::identity(2, 2);

    // Same spatial orbital for both spins: pure singlet
    let closed = [vec![c.columns(0, 1).into_owned()], vec![c.columns(0, 1).into_owned()]];
    let (ss, mult) = mf.spin_square(Some(&closed), Some(&s1e)).unwrap();
    assert!(ss.abs() < 1e-12);
    assert!((mult - 1.0).abs() < 1e-12);

    // Orthogonal orbitals: broken-symmetry <S^2> = 1
    let broken = [vec![c.columns(0, 1).into_owned()], vec![c.columns(1, 1).into_owned()]];
    let (ss, _) = mf.spin_square(Some(&broken), Some(&s1e)).unwrap();
    assert!((ss - 1.0).abs() < 1e-12);
}

#[test]
fn test_chk_guess_falls_back_to_minao() {
    let sink = Arc::new(RecordingSink::new());
    let cell = chain_cell(2, 0);
    let kpts = cell.make_kpts([2, 1, 1]);
    let mut mf = KUHF::new(cell, kpts, chain_model(1.0)).with_sink(sink.clone());
    mf.chkfile = Some("/nonexistent/pbc_kuhf_guess.chk".into());
    let dm = mf.get_init_guess(Some("chk")).unwrap();
    let minao = replicate_guess(&mf.init_guess_by_minao().unwrap(), 2);
    assert!(max_abs_diff(&dm, &minao) < 1e-14);
    assert!(sink
        .events()
        .iter()
        .any(|d| matches!(d, Diagnostic::ChkFallback { .. })));
}

#[test]
fn test_cell_without_atoms_uses_1e_guess() {
    let sink = Arc::new(RecordingSink::new());
    let cell = chain_cell(2, 0).with_natm(0);
    let mf = KUHF::new(cell, vec![Vector3::zeros()], chain_model(1.0)).with_sink(sink.clone());
    let dm = mf.get_init_guess(Some("minao")).unwrap();
    let one_e = replicate_guess(&mf.init_guess_by_1e().unwrap(), 1);
    assert!(max_abs_diff(&dm, &one_e) < 1e-14);
    assert!(matches!(sink.events().first(), Some(Diagnostic::NoAtomInCell)));
}

#[test]
fn test_low_dimensional_guess_is_normalized() {
    let sink = Arc::new(RecordingSink::new());
    let cell = chain_cell(2, 0).with_dimension(1);
    let kpts = cell.make_kpts([2, 1, 1]);
    let mf = KUHF::new(cell, kpts, chain_model(1.0)).with_sink(sink.clone());
    let dm = mf.get_init_guess(None).unwrap();
    let s1e = mf.get_ovlp().unwrap();
    let [na, nb] = mf.electron_count(&dm, &s1e);
    // The replicated guess is scaled by 1.01 / 0.99 and must be renormalized
    assert!((na - 1.0).abs() < 1e-10);
    assert!((nb - 1.0).abs() < 1e-10);
    assert!(sink
        .events()
        .iter()
        .any(|d| matches!(d, Diagnostic::ElectronCountMismatch { .. })));
}
