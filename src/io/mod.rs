//! Input/Output for k-point SCF calculations
//!
//! This module handles logging setup, result reports and checkpoint files.

pub mod checkpoint;
mod output;

pub use checkpoint::{dump_scf, load_scf, ChkOrbitals, ScfRecord};
pub use output::{print_band_structure, print_scf_summary, setup_output};
