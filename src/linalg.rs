//! Dense complex linear algebra shared by the SCF components
//!
//! All AO and MO matrices are `DMatrix<Complex64>`; gamma-point quantities
//! simply carry zero imaginary parts.

use crate::error::{KscfError, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Complex AO/MO matrix.
pub type CMatrix = DMatrix<Complex64>;

/// Per-spin (alpha, beta), per-k-point data.
pub type SpinKpts<T> = [Vec<T>; 2];

/// Overlap eigenvalues below this are treated as linear dependencies.
const LINDEP_THRESHOLD: f64 = 1e-10;

#[inline]
pub fn c64(x: f64) -> Complex64 {
    Complex64::new(x, 0.0)
}

pub fn to_complex(m: &DMatrix<f64>) -> CMatrix {
    m.map(c64)
}

pub fn real_part(m: &CMatrix) -> DMatrix<f64> {
    m.map(|z| z.re)
}

/// tr(A B) without forming the product.
pub fn trace_product(a: &CMatrix, b: &CMatrix) -> Complex64 {
    a.component_mul(&b.transpose()).sum()
}

/// Frobenius norm of the anti-Hermitian part, `||A - A^H||`.
pub fn hermiticity_error(m: &CMatrix) -> f64 {
    (m - m.adjoint()).norm()
}

/// Fixes the arbitrary phase of each eigenvector so that its largest
/// component is real and positive.
pub fn align_phases(mut vecs: CMatrix) -> CMatrix {
    for j in 0..vecs.ncols() {
        let pivot = vecs
            .column(j)
            .iter()
            .copied()
            .max_by(|a, b| a.norm().partial_cmp(&b.norm()).unwrap_or(Ordering::Less));
        if let Some(p) = pivot {
            let r = p.norm();
            if r > 0.0 {
                let phase = (p / r).conj();
                vecs.column_mut(j).iter_mut().for_each(|z| *z *= phase);
            }
        }
    }
    vecs
}

/// Eigen-decomposition of a Hermitian matrix with eigenpairs sorted
/// ascending. The sort is stable, so degenerate eigenvalues keep the
/// solver's order.
pub fn eigh(h: &CMatrix) -> (DVector<f64>, CMatrix) {
    let n = h.nrows();
    if n == 0 {
        return (DVector::zeros(0), CMatrix::zeros(0, 0));
    }
    let herm = (h + h.adjoint()) * c64(0.5);
    let eig = herm.symmetric_eigen();

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(Ordering::Equal)
    });
    let values = DVector::from_iterator(n, idx.iter().map(|&i| eig.eigenvalues[i]));
    let vectors = eig.eigenvectors.select_columns(&idx);
    (values, align_phases(vectors))
}

/// Canonical orthogonalizer `X = U s^{-1/2}` of an overlap matrix, so that
/// `X^H S X = 1`. Near-singular directions are dropped, which makes `X`
/// rectangular (nao x nmo) for linearly dependent bases.
pub fn orthogonalizer(s: &CMatrix) -> CMatrix {
    let (values, vectors) = eigh(s);
    let kept: Vec<usize> = (0..values.len())
        .filter(|&i| values[i] > LINDEP_THRESHOLD)
        .collect();
    let mut x = vectors.select_columns(&kept);
    for (col, &i) in kept.iter().enumerate() {
        let scale = c64(1.0 / values[i].sqrt());
        x.column_mut(col).iter_mut().for_each(|z| *z *= scale);
    }
    x
}

/// Solves the generalized Hermitian problem `H C = S C e`.
pub fn eigh_generalized(h: &CMatrix, s: &CMatrix) -> Result<(DVector<f64>, CMatrix)> {
    if h.shape() != s.shape() || h.nrows() != h.ncols() {
        return Err(KscfError::shape(
            "generalized eigenproblem",
            format!("{:?}", s.shape()),
            format!("{:?}", h.shape()),
        ));
    }
    let x = orthogonalizer(s);
    if x.ncols() == 0 && h.nrows() > 0 {
        return Err(KscfError::Linalg("overlap matrix is not positive definite".into()));
    }
    let f_prime = x.adjoint() * h * &x;
    let (e, c_prime) = eigh(&f_prime);
    Ok((e, align_phases(x * c_prime)))
}

/// Diagonalizes every k-point independently. Results keep k-point order.
pub fn eig_kpts(h: &[CMatrix], s: &[CMatrix]) -> Result<(Vec<DVector<f64>>, Vec<CMatrix>)> {
    if h.len() != s.len() {
        return Err(KscfError::shape("eig: number of k-points", s.len(), h.len()));
    }
    let pairs = h
        .par_iter()
        .zip(s.par_iter())
        .map(|(hk, sk)| eigh_generalized(hk, sk))
        .collect::<Result<Vec<_>>>()?;
    Ok(pairs.into_iter().unzip())
}

/// Checks that every matrix is `nao x nao`.
pub(crate) fn check_square(context: &'static str, mats: &[CMatrix], nao: usize) -> Result<()> {
    for m in mats {
        if m.nrows() != nao || m.ncols() != nao {
            return Err(KscfError::shape(
                context,
                format!("({nao}, {nao})"),
                format!("{:?}", m.shape()),
            ));
        }
    }
    Ok(())
}
