//! Initial guess densities and checkpoint projection

use super::density::make_rdm1;
use crate::cell::{is_gamma_only, kpts_allclose, nearest_kpt, Cell};
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{KscfError, Result};
use crate::io::checkpoint::ScfRecord;
use crate::linalg::{c64, eigh_generalized, real_part, to_complex, trace_product, CMatrix, SpinKpts};
use crate::service::KptsService;
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spin-symmetry breaking factors applied to replicated guesses.
const ALPHA_SCALE: f64 = 1.01;
const BETA_SCALE: f64 = 0.99;

/// Tolerance on the electron count per cell of a low-dimensional guess.
const NELEC_TOL: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitGuess {
    /// Diagonalise the core Hamiltonian.
    #[serde(rename = "1e")]
    OneElectron,
    #[serde(rename = "atom")]
    Atom,
    #[default]
    #[serde(rename = "minao")]
    Minao,
    #[serde(rename = "chk")]
    Chk,
}

impl InitGuess {
    /// Interprets a guess key: `1e`, `atom`, anything starting with `chk`;
    /// every other key selects the minimal-basis guess.
    pub fn from_key(key: &str) -> Self {
        let key = key.to_lowercase();
        match key.as_str() {
            "1e" => InitGuess::OneElectron,
            "atom" => InitGuess::Atom,
            k if k.starts_with("chk") => InitGuess::Chk,
            _ => InitGuess::Minao,
        }
    }
}

impl fmt::Display for InitGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            InitGuess::OneElectron => "1e",
            InitGuess::Atom => "atom",
            InitGuess::Minao => "minao",
            InitGuess::Chk => "chk",
        };
        f.write_str(key)
    }
}

/// Copies a single-cell guess to every k-point, scaling alpha by 1.01 and
/// beta by 0.99 to break spin symmetry.
pub fn replicate_guess(dm: &[DMatrix<f64>; 2], nkpts: usize) -> SpinKpts<CMatrix> {
    let alpha = to_complex(&dm[0]) * c64(ALPHA_SCALE);
    let beta = to_complex(&dm[1]) * c64(BETA_SCALE);
    [vec![alpha; nkpts], vec![beta; nkpts]]
}

/// Rescales each `(spin, kpt)` block so that `tr(D S)` equals the electron
/// count of its spin when any block is off by more than 1e-7. Blocks that
/// hold no electrons at all are left untouched.
///
/// Returns whether the density was rescaled.
pub fn normalize_electron_count(
    dm: &mut SpinKpts<CMatrix>,
    s1e: &[CMatrix],
    nelec: (usize, usize),
    sink: &dyn DiagnosticsSink,
) -> Result<bool> {
    let targets = [nelec.0 as f64, nelec.1 as f64];
    let mut ne: [Vec<f64>; 2] = [Vec::new(), Vec::new()];
    for s in 0..2 {
        if dm[s].len() != s1e.len() {
            return Err(KscfError::shape(
                "normalize_electron_count: k-points",
                s1e.len(),
                dm[s].len(),
            ));
        }
        ne[s] = dm[s]
            .iter()
            .zip(s1e)
            .map(|(d, s)| trace_product(d, s).re)
            .collect();
    }

    let off = (0..2).any(|s| ne[s].iter().any(|&n| (n - targets[s]).abs() > NELEC_TOL));
    if !off {
        return Ok(false);
    }

    let count = ne[0].len() + ne[1].len();
    let mean_per_cell = if count > 0 {
        ne.iter().flatten().sum::<f64>() / count as f64
    } else {
        0.0
    };
    sink.emit(&Diagnostic::ElectronCountMismatch { mean_per_cell });

    for s in 0..2 {
        for (d, &n) in dm[s].iter_mut().zip(&ne[s]) {
            if n != 0.0 {
                *d *= c64(targets[s] / n);
            }
        }
    }
    Ok(true)
}

/// Core-Hamiltonian guess for one cell: Aufbau filling of the gamma-point
/// eigenvectors of `h` for each spin.
pub fn init_guess_by_1e<S: KptsService + ?Sized>(
    service: &S,
    cell: &Cell,
    sink: &dyn DiagnosticsSink,
) -> Result<[DMatrix<f64>; 2]> {
    if cell.dimension < 3 {
        sink.emit(&Diagnostic::HcoreGuessLowDimension);
    }
    let gamma = [Vector3::zeros()];
    let h = service.get_hcore(cell, &gamma)?;
    let s = service.get_ovlp(cell, &gamma)?;
    let (h, s) = match (h.first(), s.first()) {
        (Some(h), Some(s)) => (h, s),
        _ => return Err(KscfError::shape("init_guess_by_1e: gamma matrices", 1, 0)),
    };
    let (_, c) = eigh_generalized(h, s)?;

    let aufbau = |nocc: usize| -> Result<DMatrix<f64>> {
        if nocc > c.ncols() {
            return Err(KscfError::shape(
                "init_guess_by_1e: occupied orbitals",
                format!("at most {}", c.ncols()),
                nocc,
            ));
        }
        let occ = c.columns(0, nocc);
        Ok(real_part(&(occ * occ.adjoint())))
    };
    let (na, nb) = cell.nelec();
    Ok([aufbau(na)?, aufbau(nb)?])
}

/// How checkpoint orbitals are mapped onto the target k-points.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionStrategy {
    /// The meshes coincide; orbitals are used k-point by k-point.
    ExactMesh,
    /// Each target k-point `i` takes the orbitals of checkpoint k-point
    /// `nearest[i]`, projected across `dkpts[i] = chk_kpts[nearest[i]] - kpts[i]`.
    NearestMesh {
        nearest: Vec<usize>,
        dkpts: Vec<Vector3<f64>>,
    },
}

impl ProjectionStrategy {
    pub fn select(chk_kpts: &[Vector3<f64>], kpts: &[Vector3<f64>]) -> Result<Self> {
        if kpts_allclose(kpts, chk_kpts) {
            return Ok(ProjectionStrategy::ExactMesh);
        }
        let nearest = kpts
            .iter()
            .map(|k| nearest_kpt(chk_kpts, k))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| KscfError::ChkLayout("checkpoint holds no k-points".into()))?;
        let dkpts = nearest
            .iter()
            .zip(kpts)
            .map(|(&w, k)| chk_kpts[w] - k)
            .collect();
        Ok(ProjectionStrategy::NearestMesh { nearest, dkpts })
    }

    /// Density matrices at the target k-points built from checkpoint
    /// orbitals. With `project` the orbitals are passed through the
    /// service's basis projector first.
    pub fn apply<S: KptsService + ?Sized>(
        &self,
        service: &S,
        chk_cell: &Cell,
        cell: &Cell,
        project: bool,
        mo_coeff: &SpinKpts<CMatrix>,
        mo_occ: &SpinKpts<DVector<f64>>,
    ) -> Result<SpinKpts<CMatrix>> {
        let fproj = |mo: Vec<CMatrix>, dkpts: Option<&[Vector3<f64>]>| -> Result<Vec<CMatrix>> {
            if project {
                service.project_mo(chk_cell, &mo, cell, dkpts)
            } else {
                Ok(mo)
            }
        };

        match self {
            ProjectionStrategy::ExactMesh => {
                let mo = [
                    fproj(mo_coeff[0].clone(), None)?,
                    fproj(mo_coeff[1].clone(), None)?,
                ];
                make_rdm1(&mo, mo_occ)
            }
            ProjectionStrategy::NearestMesh { nearest, dkpts } => {
                let pick = |s: usize| -> Result<(Vec<CMatrix>, Vec<DVector<f64>>)> {
                    nearest
                        .iter()
                        .map(|&w| match (mo_coeff[s].get(w), mo_occ[s].get(w)) {
                            (Some(c), Some(o)) => Ok((c.clone(), o.clone())),
                            _ => Err(KscfError::ChkLayout(format!(
                                "checkpoint k-point {w} has no orbitals"
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()
                        .map(|pairs| pairs.into_iter().unzip())
                };
                let (mo_a, occ_a) = pick(0)?;
                let (mo_b, occ_b) = pick(1)?;
                let mo = [
                    fproj(mo_a, Some(dkpts.as_slice()))?,
                    fproj(mo_b, Some(dkpts.as_slice()))?,
                ];
                make_rdm1(&mo, &[occ_a, occ_b])
            }
        }
    }
}

/// Density at `kpts` from a checkpoint record. Restricted records are split
/// into alpha (`occ > 1e-8`) and beta (the remainder) occupations. A
/// gamma-only target yields a purely real density.
pub fn project_chk_density<S: KptsService + ?Sized>(
    service: &S,
    chk_cell: &Cell,
    record: ScfRecord,
    cell: &Cell,
    kpts: &[Vector3<f64>],
    project: bool,
) -> Result<SpinKpts<CMatrix>> {
    let strategy = ProjectionStrategy::select(&record.chk_kpts, kpts)?;
    let (mo_coeff, mo_occ) = record.orbitals.into_spin_orbitals();
    let mut dm = strategy.apply(service, chk_cell, cell, project, &mo_coeff, &mo_occ)?;

    if is_gamma_only(kpts) {
        for d in dm.iter_mut().flatten() {
            d.iter_mut().for_each(|z| z.im = 0.0);
        }
    }
    Ok(dm)
}
