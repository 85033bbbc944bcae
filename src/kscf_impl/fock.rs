//! Fock matrix assembly with damping, DIIS and level shifting

use super::diis::Extrapolator;
use super::Spin;
use crate::error::{KscfError, Result};
use crate::linalg::{c64, check_square, CMatrix, SpinKpts};
use serde::{Deserialize, Serialize};

/// Shifts smaller than this are ignored.
const SHIFT_TOL: f64 = 1e-4;
const DAMP_TOL: f64 = 1e-4;

/// Virtual-space level shift, either shared or per spin `[alpha, beta]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelShift {
    Uniform(f64),
    PerSpin([f64; 2]),
}

impl Default for LevelShift {
    fn default() -> Self {
        LevelShift::Uniform(0.0)
    }
}

impl LevelShift {
    pub fn for_spin(&self, spin: Spin) -> f64 {
        match self {
            LevelShift::Uniform(shift) => *shift,
            LevelShift::PerSpin(shifts) => shifts[spin.index()],
        }
    }
}

/// Convergence aids applied on top of `h1e + veff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FockOptions {
    /// First cycle at which the extrapolator replaces the Fock matrix.
    pub diis_start_cycle: usize,
    pub level_shift: LevelShift,
    /// Weight of the previous Fock matrix in the damped Fock matrix.
    pub damp: f64,
}

impl Default for FockOptions {
    fn default() -> Self {
        FockOptions {
            diis_start_cycle: 1,
            level_shift: LevelShift::default(),
            damp: 0.0,
        }
    }
}

impl FockOptions {
    /// True when a damping factor is set but no cycle precedes
    /// `diis_start_cycle`, so the previous Fock matrix is never mixed in.
    pub fn damping_ignored(&self) -> bool {
        self.damp.abs() > DAMP_TOL && self.diis_start_cycle <= 1
    }
}

/// `h1e + veff` for both spins.
pub fn build_fock(h1e: &[CMatrix], vhf: &SpinKpts<CMatrix>) -> Result<SpinKpts<CMatrix>> {
    let nao = h1e.first().map_or(0, |h| h.nrows());
    check_square("build_fock: h1e", h1e, nao)?;
    let mut fock: SpinKpts<CMatrix> = [Vec::new(), Vec::new()];
    for s in 0..2 {
        if vhf[s].len() != h1e.len() {
            return Err(KscfError::shape("build_fock: veff k-points", h1e.len(), vhf[s].len()));
        }
        check_square("build_fock: veff", &vhf[s], nao)?;
        fock[s] = h1e.iter().zip(&vhf[s]).map(|(h, v)| h + v).collect();
    }
    Ok(fock)
}

/// Raises the virtual space of `f` by `factor`: `F + factor (S - S D S)`,
/// with `D` the density of the same spin.
pub fn level_shift(s: &CMatrix, d: &CMatrix, f: &CMatrix, factor: f64) -> CMatrix {
    let sds = s * d * s;
    f + (s - sds) * c64(factor)
}

/// Fock matrices for one SCF step.
///
/// `cycle` is `None` outside the iteration (no damping, no DIIS). Damping
/// mixes in `fock_last` while `cycle + 1 < diis_start_cycle`; the
/// extrapolator takes over from `diis_start_cycle` on; the level shift is
/// applied last, per spin and k-point.
#[allow(clippy::too_many_arguments)]
pub fn get_fock(
    h1e: &[CMatrix],
    s1e: &[CMatrix],
    vhf: &SpinKpts<CMatrix>,
    dm: &SpinKpts<CMatrix>,
    cycle: Option<usize>,
    diis: Option<&mut dyn Extrapolator>,
    fock_last: Option<&SpinKpts<CMatrix>>,
    opts: &FockOptions,
) -> Result<SpinKpts<CMatrix>> {
    if s1e.len() != h1e.len() {
        return Err(KscfError::shape("get_fock: overlap k-points", h1e.len(), s1e.len()));
    }
    let mut fock = build_fock(h1e, vhf)?;

    if let (Some(cycle), Some(last)) = (cycle, fock_last) {
        if cycle + 1 < opts.diis_start_cycle && opts.damp.abs() > DAMP_TOL {
            for s in 0..2 {
                if last[s].len() != fock[s].len() {
                    return Err(KscfError::shape(
                        "get_fock: previous Fock k-points",
                        fock[s].len(),
                        last[s].len(),
                    ));
                }
                for (f, f_last) in fock[s].iter_mut().zip(&last[s]) {
                    *f = &*f * c64(1.0 - opts.damp) + f_last * c64(opts.damp);
                }
            }
        }
    }

    if let (Some(cycle), Some(diis)) = (cycle, diis) {
        if cycle >= opts.diis_start_cycle {
            fock = diis.update(s1e, dm, fock, h1e, vhf)?;
        }
    }

    for spin in Spin::BOTH {
        let shift = opts.level_shift.for_spin(spin);
        if shift.abs() <= SHIFT_TOL {
            continue;
        }
        let s = spin.index();
        if dm[s].len() != s1e.len() {
            return Err(KscfError::shape("get_fock: density k-points", s1e.len(), dm[s].len()));
        }
        for (k, f) in fock[s].iter_mut().enumerate() {
            *f = level_shift(&s1e[k], &dm[s][k], f, shift);
        }
    }
    Ok(fock)
}
