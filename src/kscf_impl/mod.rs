//! Spin-unrestricted Hartree-Fock with k-point sampling
//!
//! The pieces of one SCF cycle live in separate modules and are wired
//! together by [`KUHF`]:
//!
//! guess -> `make_rdm1` -> `get_veff` (service) -> `get_fock` (DIIS, level
//! shift, damping) -> `eig` -> `get_occ` -> `energy_elec` -> ... ->
//! `canonicalize`
//!
//! Every quantity is indexed `[spin][kpt]` with spin 0 = alpha and
//! spin 1 = beta. K-point order is the order the caller supplied.

mod canonicalize;
mod density;
mod diis;
mod driver;
mod energy;
mod fock;
mod guess;
mod kuhf;
mod occupation;
#[cfg(test)]
mod tests;

use std::fmt;

pub use canonicalize::canonicalize;
pub use density::{make_rdm1, make_rdm1_kpt};
pub use diis::{Extrapolator, KDiis};
pub use driver::kernel;
pub use energy::energy_elec;
pub use fock::{build_fock, get_fock, level_shift, FockOptions, LevelShift};
pub use guess::{
    init_guess_by_1e, normalize_electron_count, project_chk_density, replicate_guess,
    InitGuess, ProjectionStrategy,
};
pub use kuhf::KUHF;
pub use occupation::{fermi_filling, get_occ, FermiFilling};

/// Spin channel of an unrestricted calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Spin {
    Alpha,
    Beta,
}

impl Spin {
    pub const BOTH: [Spin; 2] = [Spin::Alpha, Spin::Beta];

    pub fn index(self) -> usize {
        match self {
            Spin::Alpha => 0,
            Spin::Beta => 1,
        }
    }
}

impl fmt::Display for Spin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spin::Alpha => f.write_str("alpha"),
            Spin::Beta => f.write_str("beta"),
        }
    }
}
