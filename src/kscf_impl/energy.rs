//! Electronic energy of a k-point sampled UHF density

use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{KscfError, Result};
use crate::linalg::{trace_product, CMatrix, SpinKpts};
use num_complex::Complex64;

/// Largest tolerated imaginary part of the Coulomb energy.
const IMAG_TOL: f64 = 1e-10;

/// Returns `(e1 + e_coul, e_coul)` per cell.
///
/// `e1 = 1/nk sum_k tr(D_a H) + tr(D_b H)` and
/// `e_coul = 1/(2 nk) sum_k tr(D_a V_a) + tr(D_b V_b)`. An imaginary Coulomb
/// energy means the density or potential is not Hermitian; that is an
/// error, never truncated away.
pub fn energy_elec(
    dm: &SpinKpts<CMatrix>,
    h1e: &[CMatrix],
    vhf: &SpinKpts<CMatrix>,
    sink: &dyn DiagnosticsSink,
) -> Result<(f64, f64)> {
    let nkpts = h1e.len();
    for s in 0..2 {
        if dm[s].len() != nkpts || vhf[s].len() != nkpts {
            return Err(KscfError::shape(
                "energy_elec: k-points",
                nkpts,
                format!("dm {} / vhf {}", dm[s].len(), vhf[s].len()),
            ));
        }
    }
    if nkpts == 0 {
        return Ok((0.0, 0.0));
    }

    let mut e1 = Complex64::new(0.0, 0.0);
    let mut e_coul = Complex64::new(0.0, 0.0);
    for k in 0..nkpts {
        for s in 0..2 {
            if dm[s][k].shape() != h1e[k].shape() || vhf[s][k].shape() != h1e[k].shape() {
                return Err(KscfError::shape(
                    "energy_elec: nao",
                    format!("{:?}", h1e[k].shape()),
                    format!("{:?}", dm[s][k].shape()),
                ));
            }
            e1 += trace_product(&dm[s][k], &h1e[k]);
            e_coul += trace_product(&dm[s][k], &vhf[s][k]) * 0.5;
        }
    }
    e1 /= nkpts as f64;
    e_coul /= nkpts as f64;

    if e_coul.im.abs() > IMAG_TOL {
        return Err(KscfError::ImaginaryEnergy(e_coul.im));
    }
    sink.emit(&Diagnostic::CoulombEnergy(e_coul.re));
    Ok((e1.re + e_coul.re, e_coul.re))
}
