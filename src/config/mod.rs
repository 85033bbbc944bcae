//! Configuration management for k-point UHF calculations
//!
//! This module handles configuration structures, defaults, and validation
//! for a calculation on the tight-binding lattice model.

mod args;

pub use args::Args;

use crate::cell::Cell;
use crate::error::{KscfError, Result};
use crate::kscf_impl::{LevelShift, KUHF};
use crate::model::LatticeModel;
use crate::service::{ExxDiv, KptsService};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub cell: CellConfig,
    pub model: LatticeModel,
    #[serde(default)]
    pub kpts: KptsConfig,
    #[serde(default)]
    pub scf_params: ScfParams,
    pub bands: Option<BandsConfig>,
}

/// Unit cell: lattice vectors as rows (Bohr)
#[derive(Debug, Deserialize, Serialize)]
pub struct CellConfig {
    pub lattice: [[f64; 3]; 3],
    pub nelectron: usize,
    pub spin: Option<usize>,
    pub dimension: Option<usize>,
    pub natm: Option<usize>,
}

impl CellConfig {
    pub fn to_cell(&self) -> Result<Cell> {
        let rows: Vec<_> = self
            .lattice
            .iter()
            .map(|r| nalgebra::RowVector3::new(r[0], r[1], r[2]))
            .collect();
        let lattice = Matrix3::from_rows(&rows);
        let spin = self.spin.unwrap_or(0);
        if spin > self.nelectron || (self.nelectron - spin) % 2 != 0 {
            return Err(KscfError::Config(format!(
                "spin {} is incompatible with {} electrons",
                spin, self.nelectron
            )));
        }
        let dimension = self.dimension.unwrap_or(3);
        if dimension > 3 {
            return Err(KscfError::Config(format!("dimension {} out of range", dimension)));
        }
        let cell = Cell::new(lattice, self.nelectron, spin)
            .with_dimension(dimension)
            .with_natm(self.natm.unwrap_or(1));
        cell.try_reciprocal_vectors()?;
        Ok(cell)
    }
}

/// K-point sampling: an explicit list of fractional k-points or a
/// gamma-centred mesh; the gamma point alone when neither is given.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct KptsConfig {
    pub mesh: Option<[usize; 3]>,
    pub scaled: Option<Vec<[f64; 3]>>,
}

impl KptsConfig {
    pub fn to_kpts(&self, cell: &Cell) -> Vec<Vector3<f64>> {
        match (&self.scaled, self.mesh) {
            (Some(scaled), _) => {
                let scaled: Vec<Vector3<f64>> = scaled.iter().map(|&k| Vector3::from(k)).collect();
                cell.get_abs_kpts(&scaled)
            }
            (None, Some(mesh)) => cell.make_kpts(mesh),
            (None, None) => vec![Vector3::zeros()],
        }
    }
}

/// Extra k-points (fractional) for a non-self-consistent band calculation
#[derive(Debug, Deserialize, Serialize)]
pub struct BandsConfig {
    pub scaled: Vec<[f64; 3]>,
}

impl BandsConfig {
    pub fn to_kpts(&self, cell: &Cell) -> Vec<Vector3<f64>> {
        let scaled: Vec<Vector3<f64>> = self.scaled.iter().map(|&k| Vector3::from(k)).collect();
        cell.get_abs_kpts(&scaled)
    }
}

/// SCF-specific parameters
#[derive(Debug, Deserialize, Serialize)]
pub struct ScfParams {
    pub max_cycle: Option<usize>,
    pub conv_tol: Option<f64>,
    pub conv_tol_grad: Option<f64>,
    pub diis_space: Option<usize>,
    pub diis_start_cycle: Option<usize>,
    pub level_shift: Option<LevelShift>,
    pub damp: Option<f64>,
    pub init_guess: Option<String>,
    pub chkfile: Option<String>,
    pub exxdiv: Option<ExxDiv>,
}

impl Default for ScfParams {
    fn default() -> Self {
        ScfParams {
            max_cycle: Some(50),
            conv_tol: Some(1e-9),
            conv_tol_grad: None,
            diis_space: Some(8),
            diis_start_cycle: Some(1),
            level_shift: Some(LevelShift::Uniform(0.0)),
            damp: Some(0.0),
            init_guess: Some("minao".to_string()),
            chkfile: None,
            exxdiv: Some(ExxDiv::Ewald),
        }
    }
}

impl ScfParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.max_cycle.is_none() {
            self.max_cycle = defaults.max_cycle;
        }
        if self.conv_tol.is_none() {
            self.conv_tol = defaults.conv_tol;
        }
        if self.conv_tol_grad.is_none() {
            self.conv_tol_grad = self.conv_tol.map(f64::sqrt);
        }
        if self.diis_space.is_none() {
            self.diis_space = defaults.diis_space;
        }
        if self.diis_start_cycle.is_none() {
            self.diis_start_cycle = defaults.diis_start_cycle;
        }
        if self.level_shift.is_none() {
            self.level_shift = defaults.level_shift;
        }
        if self.damp.is_none() {
            self.damp = defaults.damp;
        }
        if self.init_guess.is_none() {
            self.init_guess = defaults.init_guess;
        }
        if self.exxdiv.is_none() {
            self.exxdiv = defaults.exxdiv;
        }
        self
    }

    /// Copies every set parameter onto `mf`.
    pub fn apply<S: KptsService>(&self, mf: &mut KUHF<S>) {
        if let Some(max_cycle) = self.max_cycle {
            mf.max_cycle = max_cycle;
        }
        if let Some(conv_tol) = self.conv_tol {
            mf.conv_tol = conv_tol;
        }
        if self.conv_tol_grad.is_some() {
            mf.conv_tol_grad = self.conv_tol_grad;
        }
        if let Some(diis_space) = self.diis_space {
            mf.diis_space = diis_space;
        }
        if let Some(start) = self.diis_start_cycle {
            mf.diis_start_cycle = start;
        }
        if let Some(shift) = self.level_shift {
            mf.level_shift = shift;
        }
        if let Some(damp) = self.damp {
            mf.damp = damp;
        }
        if let Some(guess) = &self.init_guess {
            mf.init_guess = guess.clone();
        }
        if let Some(chk) = &self.chkfile {
            mf.chkfile = Some(PathBuf::from(chk));
        }
        if let Some(exxdiv) = self.exxdiv {
            mf.exxdiv = exxdiv;
        }
    }
}

impl Config {
    /// Apply default values to all sections
    pub fn with_defaults(mut self) -> Self {
        self.scf_params = self.scf_params.with_defaults();
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        let cell = self.cell.to_cell()?;
        let nao = self.model.onsite.len();
        let (na, _) = cell.nelec();
        if na > nao {
            return Err(KscfError::Config(format!(
                "{} alpha electrons per cell do not fit into {} orbitals",
                na, nao
            )));
        }
        if let Some(mesh) = self.kpts.mesh {
            if mesh.contains(&0) {
                return Err(KscfError::Config(format!("k-point mesh {:?} has an empty axis", mesh)));
            }
        }
        Ok(())
    }
}
