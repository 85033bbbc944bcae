//! Diagnostics emitted by the SCF components
//!
//! Components never log through ambient state; they report events to the
//! sink they are handed. `TracingSink` forwards everything to `tracing`,
//! `RecordingSink` keeps the events for later inspection.

use crate::kscf_impl::Spin;
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Global Fermi filling result for one spin channel.
    FermiLevel {
        spin: Spin,
        homo: f64,
        lumo: Option<f64>,
    },
    /// More orbitals than electrons sit at or below the Fermi level because
    /// of degeneracy across the cutoff.
    DegenerateFermiLevel {
        spin: Spin,
        expected: usize,
        assigned: usize,
    },
    /// Occupied and virtual orbital energies of one k-point.
    OrbitalEnergies {
        spin: Spin,
        kpt_index: usize,
        scaled_kpt: [f64; 3],
        occupied: Vec<f64>,
        virtuals: Vec<f64>,
    },
    CoulombEnergy(f64),
    /// The initial guess did not hold the right number of electrons and was
    /// rescaled.
    ElectronCountMismatch { mean_per_cell: f64 },
    ChkFallback { chkfile: String, reason: String },
    HcoreGuessLowDimension,
    NoAtomInCell,
    /// Damping only acts before `diis_start_cycle`; with an empty window the
    /// factor has no effect.
    DampingIgnored { damp: f64, diis_start_cycle: usize },
    CycleSummary {
        cycle: usize,
        e_tot: f64,
        delta_e: f64,
        norm_gorb: f64,
        norm_ddm: f64,
    },
    Converged { cycles: usize, e_tot: f64 },
    NotConverged { cycles: usize, e_tot: f64 },
}

/// Receiver of SCF diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::FermiLevel { spin, homo, lumo } => match lumo {
                Some(lumo) => info!("{} HOMO = {:.12}  LUMO = {:.12}", spin, homo, lumo),
                None => info!("{} HOMO = {:.12}  (no LUMO because of small basis)", spin, homo),
            },
            Diagnostic::DegenerateFermiLevel {
                spin,
                expected,
                assigned,
            } => warn!(
                "{} Fermi level is degenerate: {} orbitals occupied, {} electrons expected",
                spin, assigned, expected
            ),
            Diagnostic::OrbitalEnergies {
                spin,
                kpt_index,
                scaled_kpt,
                occupied,
                virtuals,
            } => debug!(
                "  {:2} ({:6.3} {:6.3} {:6.3})  {} occ {:?} vir {:?}",
                kpt_index, scaled_kpt[0], scaled_kpt[1], scaled_kpt[2], spin, occupied, virtuals
            ),
            Diagnostic::CoulombEnergy(e) => debug!("E_coul = {:.15}", e),
            Diagnostic::ElectronCountMismatch { mean_per_cell } => warn!(
                "Big error detected in the electron number of initial guess density matrix \
                 (Ne/cell = {:.6})! DM is normalized to correct number of electrons",
                mean_per_cell
            ),
            Diagnostic::ChkFallback { chkfile, reason } => {
                warn!("Fail in reading {} ({}). Use MINAO initial guess", chkfile, reason)
            }
            Diagnostic::HcoreGuessLowDimension => warn!(
                "Hcore initial guess is not recommended in the SCF of low-dimensional systems."
            ),
            Diagnostic::NoAtomInCell => info!("No atom found in cell. Use 1e initial guess"),
            Diagnostic::DampingIgnored {
                damp,
                diis_start_cycle,
            } => warn!(
                "damp = {} has no effect: damping stops at diis_start_cycle = {}",
                damp, diis_start_cycle
            ),
            Diagnostic::CycleSummary {
                cycle,
                e_tot,
                delta_e,
                norm_gorb,
                norm_ddm,
            } => info!(
                "cycle= {} E= {:.15}  delta_E= {:.3e}  |g|= {:.3e}  |ddm|= {:.3e}",
                cycle, e_tot, delta_e, norm_gorb, norm_ddm
            ),
            Diagnostic::Converged { cycles, e_tot } => {
                info!("converged SCF energy = {:.15} after {} cycles", e_tot, cycles)
            }
            Diagnostic::NotConverged { cycles, e_tot } => {
                warn!("SCF not converged after {} cycles, SCF energy = {:.15}", cycles, e_tot)
            }
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Fermi level reported for `spin`, if any.
    pub fn fermi_level(&self, spin: Spin) -> Option<f64> {
        self.events().into_iter().rev().find_map(|d| match d {
            Diagnostic::FermiLevel { spin: s, homo, .. } if s == spin => Some(homo),
            _ => None,
        })
    }
}

impl DiagnosticsSink for RecordingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(diagnostic.clone());
        }
    }
}
