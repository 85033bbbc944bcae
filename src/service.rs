//! Collaborators the k-point SCF delegates to
//!
//! Integral evaluation, the exchange treatment and orbital projection between
//! basis sets belong to the cell/basis layer. `KUHF` only sees them through
//! `KptsService`.

use crate::cell::Cell;
use crate::error::{KscfError, Result};
use crate::linalg::{eig_kpts, CMatrix, SpinKpts};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Treatment of the G = 0 divergence of the exchange integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExxDiv {
    #[default]
    Ewald,
    VcutSph,
    VcutWs,
    None,
}

impl FromStr for ExxDiv {
    type Err = KscfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ewald" => Ok(ExxDiv::Ewald),
            "vcut_sph" => Ok(ExxDiv::VcutSph),
            "vcut_ws" => Ok(ExxDiv::VcutWs),
            "none" => Ok(ExxDiv::None),
            other => Err(KscfError::Config(format!("unknown exxdiv treatment `{other}`"))),
        }
    }
}

impl fmt::Display for ExxDiv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExxDiv::Ewald => "ewald",
            ExxDiv::VcutSph => "vcut_sph",
            ExxDiv::VcutWs => "vcut_ws",
            ExxDiv::None => "none",
        };
        f.write_str(name)
    }
}

/// Coulomb and exchange matrices, each indexed `[spin][kpt]`.
pub type JkPair = (SpinKpts<CMatrix>, SpinKpts<CMatrix>);

pub trait KptsService: Send + Sync {
    /// Number of atomic orbitals per cell.
    fn nao(&self) -> usize;

    fn get_hcore(&self, cell: &Cell, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>>;

    fn get_ovlp(&self, cell: &Cell, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>>;

    /// Coulomb (`vj[s]`) and exchange (`vk[s]`) potentials generated by the
    /// spin densities `dm[s]` sampled at `kpts`. With `kpts_band` the
    /// potentials are evaluated at those k-points instead.
    fn get_jk(
        &self,
        cell: &Cell,
        dm: &SpinKpts<CMatrix>,
        kpts: &[Vector3<f64>],
        kpts_band: Option<&[Vector3<f64>]>,
        exxdiv: ExxDiv,
    ) -> Result<JkPair>;

    fn energy_nuc(&self, _cell: &Cell) -> f64 {
        0.0
    }

    /// Generalized eigenproblem at every k-point.
    fn eig(&self, h: &[CMatrix], s: &[CMatrix]) -> Result<(Vec<DVector<f64>>, Vec<CMatrix>)> {
        eig_kpts(h, s)
    }

    /// Superposition-of-atoms guess, `(dm_alpha, dm_beta)` for one cell.
    fn init_guess_by_atom(&self, cell: &Cell) -> Result<[DMatrix<f64>; 2]>;

    /// Minimal-basis projected guess, `(dm_alpha, dm_beta)` for one cell.
    fn init_guess_by_minao(&self, cell: &Cell) -> Result<[DMatrix<f64>; 2]>;

    /// Projects orbitals of `chk_cell` onto the basis of `cell`. `dkpts`
    /// holds the displacement between the source and target k-point of
    /// each orbital set when the meshes differ.
    fn project_mo(
        &self,
        _chk_cell: &Cell,
        mo: &[CMatrix],
        _cell: &Cell,
        _dkpts: Option<&[Vector3<f64>]>,
    ) -> Result<Vec<CMatrix>> {
        Ok(mo.to_vec())
    }
}
