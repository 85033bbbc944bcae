//! Fermi filling shared by all k-points of a spin channel

use super::Spin;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{KscfError, Result};
use crate::linalg::SpinKpts;
use nalgebra::{DVector, Vector3};
use std::cmp::Ordering;

/// Result of filling `nocc` electrons into the pooled orbital energies of
/// one spin channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FermiFilling {
    pub mo_occ: Vec<DVector<f64>>,
    pub homo: f64,
    pub lumo: Option<f64>,
    /// Orbitals at or below the Fermi level; exceeds `nocc` when the
    /// Fermi level is degenerate across the cutoff.
    pub nocc_assigned: usize,
}

/// Pools the energies of every k-point, sorts them (stable) and puts the
/// Fermi level at rank `nocc - 1`. Every orbital with `e <= fermi` is
/// occupied.
pub fn fermi_filling(mo_energy: &[DVector<f64>], nocc: usize) -> Result<FermiFilling> {
    let mut pooled: Vec<f64> = mo_energy.iter().flat_map(|e| e.iter().copied()).collect();
    pooled.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    if nocc == 0 || nocc > pooled.len() {
        return Err(KscfError::shape(
            "get_occ: occupied orbitals over all k-points",
            format!("between 1 and {}", pooled.len()),
            nocc,
        ));
    }
    let homo = pooled[nocc - 1];
    let lumo = pooled.get(nocc).copied();

    let mo_occ: Vec<DVector<f64>> = mo_energy
        .iter()
        .map(|e| e.map(|x| if x <= homo { 1.0 } else { 0.0 }))
        .collect();
    let nocc_assigned = mo_occ.iter().map(|o| o.sum()).sum::<f64>() as usize;

    Ok(FermiFilling {
        mo_occ,
        homo,
        lumo,
        nocc_assigned,
    })
}

/// Occupation numbers for every spin and k-point.
///
/// `nelec` is the electron count per cell; `nelec[s] * nkpts` orbitals are
/// filled per spin. A beta channel without electrons gets all-zero
/// occupations and no Fermi level. `scaled_kpts` only labels the per-k-point
/// energy listing sent to the sink.
pub fn get_occ(
    nelec: (usize, usize),
    mo_energy: &SpinKpts<DVector<f64>>,
    scaled_kpts: &[Vector3<f64>],
    sink: &dyn DiagnosticsSink,
) -> Result<SpinKpts<DVector<f64>>> {
    let nkpts = mo_energy[0].len();
    if mo_energy[1].len() != nkpts {
        return Err(KscfError::shape("get_occ: beta k-points", nkpts, mo_energy[1].len()));
    }
    let counts = [nelec.0, nelec.1];

    let mut mo_occ: SpinKpts<DVector<f64>> = [Vec::new(), Vec::new()];
    for spin in Spin::BOTH {
        let s = spin.index();
        if counts[s] == 0 {
            mo_occ[s] = mo_energy[s].iter().map(|e| DVector::zeros(e.len())).collect();
            continue;
        }
        let nocc = counts[s] * nkpts;
        let filling = fermi_filling(&mo_energy[s], nocc)?;
        sink.emit(&Diagnostic::FermiLevel {
            spin,
            homo: filling.homo,
            lumo: filling.lumo,
        });
        if filling.nocc_assigned != nocc {
            sink.emit(&Diagnostic::DegenerateFermiLevel {
                spin,
                expected: nocc,
                assigned: filling.nocc_assigned,
            });
        }
        mo_occ[s] = filling.mo_occ;
    }

    for spin in Spin::BOTH {
        let s = spin.index();
        for (k, kpt) in scaled_kpts.iter().enumerate().take(nkpts) {
            let (occupied, virtuals): (Vec<(f64, f64)>, Vec<(f64, f64)>) = mo_energy[s][k]
                .iter()
                .copied()
                .zip(mo_occ[s][k].iter().copied())
                .partition(|&(_, o)| o > 0.0);
            sink.emit(&Diagnostic::OrbitalEnergies {
                spin,
                kpt_index: k,
                scaled_kpt: [kpt.x, kpt.y, kpt.z],
                occupied: occupied.into_iter().map(|(e, _)| e).collect(),
                virtuals: virtuals.into_iter().map(|(e, _)| e).collect(),
            });
        }
    }
    Ok(mo_occ)
}
