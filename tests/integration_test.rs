//! End-to-end KUHF runs on the tight-binding lattice model
//!
//! The non-interacting chain has a closed-form band energy; the Hubbard
//! chain exercises the spin-polarized path from an antiferromagnetic guess.

use nalgebra::{DVector, Matrix3, Vector3};
use pbc_kuhf::config::Config;
use pbc_kuhf::kscf_impl::make_rdm1;
use pbc_kuhf::linalg::{c64, hermiticity_error, CMatrix, SpinKpts};
use pbc_kuhf::{Cell, Diagnostic, LatticeModel, LevelShift, RecordingSink, KUHF};
use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;

const A: f64 = 4.0;

fn chain_cell() -> Cell {
    Cell::new(Matrix3::from_diagonal(&Vector3::new(A, 12.0, 12.0)), 2, 0).with_natm(2)
}

/// Dimerized chain: intra-cell hopping -1, inter-cell hopping `t2`.
fn chain_model(u: f64, t2: f64) -> LatticeModel {
    LatticeModel::new(vec![0.0, 0.0])
        .with_hubbard_u(vec![u, u])
        .with_hopping(0, 1, [0, 0, 0], -1.0)
        .with_hopping(1, 0, [1, 0, 0], t2)
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pbc_kuhf_{}_{}.json", name, std::process::id()))
}

fn total_occupation(mo_occ: &SpinKpts<DVector<f64>>, spin: usize) -> f64 {
    mo_occ[spin].iter().map(|o| o.sum()).sum()
}

#[test]
fn test_noninteracting_chain_band_energy() {
    let sink = Arc::new(RecordingSink::new());
    let cell = chain_cell();
    let kpts = cell.make_kpts([4, 1, 1]);
    let mut mf = KUHF::new(cell, kpts, chain_model(0.0, -0.5)).with_sink(sink.clone());
    let e_tot = mf.kernel(None).unwrap();

    // Lower band -|1 + 0.5 exp(-ika)|, doubly occupied at every k-point
    let expected: f64 = (0..4)
        .map(|i| {
            let ka = 2.0 * PI * i as f64 / 4.0;
            -2.0 * (1.25 + ka.cos()).sqrt()
        })
        .sum::<f64>()
        / 4.0;
    assert!(mf.converged);
    assert!((e_tot - expected).abs() < 1e-8, "{} vs {}", e_tot, expected);
    assert_eq!(mf.e_tot, e_tot);
    assert!(sink
        .events()
        .iter()
        .any(|d| matches!(d, Diagnostic::Converged { .. })));

    for s in 0..2 {
        assert_eq!(total_occupation(&mf.mo_occ, s), 4.0);
    }
    let dm = mf.make_rdm1().unwrap();
    for d in dm.iter().flatten() {
        assert!(hermiticity_error(d) < 1e-10);
    }
    let (ss, mult) = mf.spin_square(None, None).unwrap();
    assert!(ss.abs() < 1e-8);
    assert!((mult - 1.0).abs() < 1e-8);
}

#[test]
fn test_level_shift_and_damping_keep_the_solution() {
    let cell = chain_cell();
    let kpts = cell.make_kpts([4, 1, 1]);
    let mut reference = KUHF::new(cell.clone(), kpts.clone(), chain_model(0.0, -0.5));
    let e_ref = reference.kernel(None).unwrap();

    let mut mf = KUHF::new(cell, kpts, chain_model(0.0, -0.5));
    mf.level_shift = LevelShift::PerSpin([0.3, 0.2]);
    mf.damp = 0.5;
    mf.diis_start_cycle = 3;
    let e_tot = mf.kernel(None).unwrap();
    assert!(mf.converged);
    assert!((e_tot - e_ref).abs() < 1e-8);

    // Orbital energies come from the unshifted Fock matrix
    for (a, b) in mf.mo_energy[0].iter().zip(&reference.mo_energy[0]) {
        assert!((a - b).amax() < 1e-6);
    }
}

#[test]
fn test_bands_at_scf_kpoints() {
    let cell = chain_cell();
    let kpts = cell.make_kpts([4, 1, 1]);
    let mut mf = KUHF::new(cell, kpts.clone(), chain_model(0.0, -0.5));
    mf.kernel(None).unwrap();

    let (bands, coeff) = mf.get_bands(&kpts, None).unwrap();
    assert_eq!(coeff[0].len(), 4);
    for (band, e) in bands[0].iter().zip(&mf.mo_energy[0]) {
        assert!((band - e).amax() < 1e-8);
    }

    // Gamma point lower band is -|1 + 0.5|
    let (bands, _) = mf.get_bands(&[Vector3::zeros()], None).unwrap();
    assert!((bands[1][0][0] + 1.5).abs() < 1e-10);
}

#[test]
fn test_antiferromagnetic_hubbard_chain() {
    let cell = chain_cell();
    let kpts = cell.make_kpts([3, 1, 1]);
    let nk = kpts.len();
    let mut mf = KUHF::new(cell, kpts, chain_model(4.0, -1.0));
    mf.max_cycle = 200;
    mf.conv_tol = 1e-8;

    // Alpha electron on site 0, beta electron on site 1
    let site = |i: usize| {
        let mut d = CMatrix::zeros(2, 2);
        d[(i, i)] = c64(1.0);
        d
    };
    let dm0 = [vec![site(0); nk], vec![site(1); nk]];
    let e_tot = mf.kernel(Some(dm0)).unwrap();
    assert!(mf.converged);

    for s in 0..2 {
        assert_eq!(total_occupation(&mf.mo_occ, s), nk as f64);
    }
    let dm = mf.make_rdm1().unwrap();
    let n_alpha_site0: f64 = dm[0].iter().map(|d| d[(0, 0)].re).sum::<f64>() / nk as f64;
    let n_beta_site0: f64 = dm[1].iter().map(|d| d[(0, 0)].re).sum::<f64>() / nk as f64;
    assert!(n_alpha_site0 > n_beta_site0 + 0.1);

    // The polarized solution lies below the paramagnetic one
    let mut para = KUHF::new(chain_cell(), chain_cell().make_kpts([3, 1, 1]), chain_model(4.0, -1.0));
    para.max_cycle = 200;
    let e_para = para.kernel(None).unwrap();
    assert!(e_tot < e_para);

    let (ss, _) = mf.spin_square(None, None).unwrap();
    assert!(ss > 0.0);

    let grad = mf.get_grad(&mf.mo_coeff, &mf.mo_occ, None).unwrap();
    assert!(grad.norm() < 1e-3);
}

#[test]
fn test_checkpoint_restart() {
    let path = temp_path("restart");
    let cell = chain_cell();
    let kpts = cell.make_kpts([4, 1, 1]);
    let mut mf = KUHF::new(cell.clone(), kpts.clone(), chain_model(0.0, -0.5));
    mf.chkfile = Some(path.clone());
    mf.kernel(None).unwrap();

    // Same mesh: the guess is exactly the stored density
    let mut restart = KUHF::new(cell.clone(), kpts, chain_model(0.0, -0.5));
    restart.chkfile = Some(path.clone());
    restart.init_guess = "chkfile".to_string();
    let dm = restart.get_init_guess(None).unwrap();
    let expected = mf.make_rdm1().unwrap();
    for (a, b) in dm.iter().flatten().zip(expected.iter().flatten()) {
        assert!((a - b).camax() < 1e-12);
    }

    // Coarser mesh: nearest checkpoint k-points
    let coarse = cell.make_kpts([2, 1, 1]);
    let mut restart = KUHF::new(cell.clone(), coarse, chain_model(0.0, -0.5));
    restart.chkfile = Some(path.clone());
    restart.init_guess = "chk".to_string();
    let e_coarse = restart.kernel(None).unwrap();
    assert!(restart.converged);
    assert!(e_coarse.is_finite());

    // Gamma-only target: purely real guess
    let gamma = KUHF::new(cell, vec![Vector3::zeros()], chain_model(0.0, -0.5));
    let dm = gamma.init_guess_by_chkfile(Some(&path), true, None).unwrap();
    assert!(dm.iter().flatten().all(|d| d.iter().all(|z| z.im == 0.0)));
    let ne: f64 = dm[0][0].trace().re;
    assert!((ne - 1.0).abs() < 1e-10);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_canonical_orbitals_reproduce_density() {
    let cell = chain_cell();
    let kpts = cell.make_kpts([3, 1, 1]);
    let mut mf = KUHF::new(cell, kpts, chain_model(2.0, -0.7));
    mf.kernel(None).unwrap();

    let dm = mf.make_rdm1().unwrap();
    let (_, coeff) = mf.canonicalize(&mf.mo_coeff, &mf.mo_occ, None).unwrap();
    let dm_new = make_rdm1(&coeff, &mf.mo_occ).unwrap();
    for (a, b) in dm.iter().flatten().zip(dm_new.iter().flatten()) {
        assert!((a - b).camax() < 1e-10);
    }
}

#[test]
fn test_demo_config() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demo")
        .join("hubbard_chain.yaml");
    let content = std::fs::read_to_string(&path).unwrap();
    let config: Config = serde_yml::from_str::<Config>(&content)
        .unwrap()
        .with_defaults();
    config.validate().unwrap();

    let cell = config.cell.to_cell().unwrap();
    let kpts = config.kpts.to_kpts(&cell);
    let mut mf = KUHF::new(cell, kpts, config.model);
    config.scf_params.apply(&mut mf);
    mf.kernel(None).unwrap();
    assert!(mf.converged);
}
