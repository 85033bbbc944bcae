//! One-particle density matrices from orbitals and occupations

use crate::error::{KscfError, Result};
use crate::linalg::{c64, CMatrix, SpinKpts};
use nalgebra::DVector;

/// `C diag(occ) C^H` for a single k-point.
pub fn make_rdm1_kpt(mo_coeff: &CMatrix, mo_occ: &DVector<f64>) -> Result<CMatrix> {
    if mo_coeff.ncols() != mo_occ.len() {
        return Err(KscfError::shape(
            "make_rdm1: occupations per k-point",
            mo_coeff.ncols(),
            mo_occ.len(),
        ));
    }
    let mut weighted = mo_coeff.clone();
    for (j, &occ) in mo_occ.iter().enumerate() {
        weighted.column_mut(j).iter_mut().for_each(|z| *z *= c64(occ));
    }
    Ok(weighted * mo_coeff.adjoint())
}

/// Alpha and beta density matrices for all k-points, `[spin][kpt]` of
/// `nao x nao` Hermitian matrices.
///
/// A spin channel with no occupation vectors (no electrons of that spin)
/// yields zero matrices.
pub fn make_rdm1(
    mo_coeff: &SpinKpts<CMatrix>,
    mo_occ: &SpinKpts<DVector<f64>>,
) -> Result<SpinKpts<CMatrix>> {
    let nkpts = mo_occ[0].len();
    let nao = match mo_coeff[0].first() {
        Some(c) => c.nrows(),
        None if nkpts == 0 => return Ok([Vec::new(), Vec::new()]),
        None => return Err(KscfError::shape("make_rdm1: alpha orbitals", nkpts, 0)),
    };

    let mut dm: SpinKpts<CMatrix> = [Vec::with_capacity(nkpts), Vec::with_capacity(nkpts)];
    for s in 0..2 {
        if s == 1 && mo_occ[1].is_empty() {
            dm[1] = vec![CMatrix::zeros(nao, nao); nkpts];
            continue;
        }
        if mo_coeff[s].len() != nkpts || mo_occ[s].len() != nkpts {
            return Err(KscfError::shape(
                "make_rdm1: k-points per spin",
                nkpts,
                format!("{} orbital sets, {} occupation sets", mo_coeff[s].len(), mo_occ[s].len()),
            ));
        }
        for (c, occ) in mo_coeff[s].iter().zip(&mo_occ[s]) {
            if c.nrows() != nao {
                return Err(KscfError::shape("make_rdm1: nao", nao, c.nrows()));
            }
            dm[s].push(make_rdm1_kpt(c, occ)?);
        }
    }
    Ok(dm)
}
