//! Canonical orbitals within fixed occupied and virtual spaces

use crate::error::{KscfError, Result};
use crate::linalg::{eigh, CMatrix, SpinKpts};
use nalgebra::DVector;
use rayon::prelude::*;

const OCC_TOL: f64 = 1e-8;

fn is_occupied(occ: f64) -> bool {
    (occ - 1.0).abs() < OCC_TOL
}

/// Diagonalizes `orb^H F orb` over the columns in `idx` and writes the
/// rotated orbitals and their energies back in place.
fn eig_subspace(
    fock: &CMatrix,
    mo: &CMatrix,
    idx: &[usize],
    mo_energy: &mut DVector<f64>,
    mo_coeff: &mut CMatrix,
) {
    if idx.is_empty() {
        return;
    }
    let orb = mo.select_columns(idx);
    let f1 = orb.adjoint() * fock * &orb;
    let (e, c) = eigh(&f1);
    let rotated = orb * c;
    for (col, &i) in idx.iter().enumerate() {
        mo_energy[i] = e[col];
        mo_coeff.set_column(i, &rotated.column(col));
    }
}

fn canonicalize_kpt(
    fock: &CMatrix,
    mo: &CMatrix,
    occ: &DVector<f64>,
) -> Result<(DVector<f64>, CMatrix)> {
    if mo.ncols() != occ.len() || fock.nrows() != mo.nrows() || !fock.is_square() {
        return Err(KscfError::shape(
            "canonicalize",
            format!("fock ({0}, {0}), {1} occupations", mo.nrows(), mo.ncols()),
            format!("fock {:?}, {} occupations", fock.shape(), occ.len()),
        ));
    }
    let (occidx, viridx): (Vec<usize>, Vec<usize>) =
        (0..occ.len()).partition(|&i| is_occupied(occ[i]));

    let mut mo_energy = DVector::zeros(occ.len());
    let mut mo_coeff = mo.clone();
    eig_subspace(fock, mo, &occidx, &mut mo_energy, &mut mo_coeff);
    eig_subspace(fock, mo, &viridx, &mut mo_energy, &mut mo_coeff);
    Ok((mo_energy, mo_coeff))
}

/// Rotates the orbitals of every spin and k-point so that the Fock matrix
/// is diagonal inside the occupied space and inside the virtual space. The
/// two spaces are never mixed, so occupations and the density are
/// unchanged.
///
/// Returns `(mo_energy, mo_coeff)`.
pub fn canonicalize(
    mo_coeff: &SpinKpts<CMatrix>,
    mo_occ: &SpinKpts<DVector<f64>>,
    fock: &SpinKpts<CMatrix>,
) -> Result<(SpinKpts<DVector<f64>>, SpinKpts<CMatrix>)> {
    let mut mo_energy: SpinKpts<DVector<f64>> = [Vec::new(), Vec::new()];
    let mut coeff: SpinKpts<CMatrix> = [Vec::new(), Vec::new()];
    for s in 0..2 {
        let nkpts = mo_coeff[s].len();
        if mo_occ[s].len() != nkpts || fock[s].len() != nkpts {
            return Err(KscfError::shape(
                "canonicalize: k-points",
                nkpts,
                format!("occ {} / fock {}", mo_occ[s].len(), fock[s].len()),
            ));
        }
        let results = (0..nkpts)
            .into_par_iter()
            .map(|k| canonicalize_kpt(&fock[s][k], &mo_coeff[s][k], &mo_occ[s][k]))
            .collect::<Result<Vec<_>>>()?;
        let (e, c): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        mo_energy[s] = e;
        coeff[s] = c;
    }
    Ok((mo_energy, coeff))
}
