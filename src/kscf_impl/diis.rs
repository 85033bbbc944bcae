//! DIIS (Direct Inversion in the Iterative Subspace) for k-point UHF
//!
//! The error vector of one SCF step is the set of commutators
//! `E = F D S - S D F` for every spin and k-point. The extrapolated Fock
//! matrix is `F_DIIS = sum_i c_i F_i` with `c` minimizing `|sum_i c_i E_i|^2`
//! under `sum_i c_i = 1`.

use crate::error::{KscfError, Result};
use crate::linalg::{c64, CMatrix, SpinKpts};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use std::collections::VecDeque;
use tracing::debug;

/// Squared error norm below which extrapolation is skipped.
const ERROR_FLOOR: f64 = 1e-24;

/// History-based Fock extrapolation, updated once per SCF cycle.
pub trait Extrapolator {
    /// Records the current step and returns the Fock matrices to
    /// diagonalize.
    fn update(
        &mut self,
        s1e: &[CMatrix],
        dm: &SpinKpts<CMatrix>,
        fock: SpinKpts<CMatrix>,
        h1e: &[CMatrix],
        vhf: &SpinKpts<CMatrix>,
    ) -> Result<SpinKpts<CMatrix>>;

    fn reset(&mut self);
}

/// Commutator DIIS over both spins and all k-points.
#[derive(Debug, Clone)]
pub struct KDiis {
    error_vectors: VecDeque<Vec<CMatrix>>,
    fock_matrices: VecDeque<SpinKpts<CMatrix>>,
    max_subspace_size: usize,
}

impl KDiis {
    /// `max_subspace_size` is the number of past steps kept (typically 6-12).
    pub fn new(max_subspace_size: usize) -> Self {
        KDiis {
            error_vectors: VecDeque::with_capacity(max_subspace_size),
            fock_matrices: VecDeque::with_capacity(max_subspace_size),
            max_subspace_size: max_subspace_size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.error_vectors.len()
    }

    /// Frobenius norm of the most recent error vector.
    pub fn last_error_norm(&self) -> Option<f64> {
        self.error_vectors
            .back()
            .map(|errs| errs.iter().map(|e| e.norm_squared()).sum::<f64>().sqrt())
    }

    fn error_vector(
        s1e: &[CMatrix],
        dm: &SpinKpts<CMatrix>,
        fock: &SpinKpts<CMatrix>,
    ) -> Result<Vec<CMatrix>> {
        let mut errors = Vec::with_capacity(2 * s1e.len());
        for s in 0..2 {
            if fock[s].len() != s1e.len() || dm[s].len() != s1e.len() {
                return Err(KscfError::shape(
                    "DIIS: k-points",
                    s1e.len(),
                    format!("fock {} / dm {}", fock[s].len(), dm[s].len()),
                ));
            }
            for ((f, d), ovlp) in fock[s].iter().zip(&dm[s]).zip(s1e) {
                let fds = f * d * ovlp;
                let sdf = ovlp * d * f;
                errors.push(fds - sdf);
            }
        }
        Ok(errors)
    }

    fn push(&mut self, errors: Vec<CMatrix>, fock: SpinKpts<CMatrix>) {
        if self.error_vectors.len() >= self.max_subspace_size {
            self.error_vectors.pop_front();
            self.fock_matrices.pop_front();
        }
        self.error_vectors.push_back(errors);
        self.fock_matrices.push_back(fock);
    }

    /// Solves the DIIS equations; `None` with fewer than two vectors or a
    /// singular B matrix.
    pub fn extrapolate(&self) -> Option<SpinKpts<CMatrix>> {
        let n = self.error_vectors.len();
        if n < 2 {
            return None;
        }

        // B_ij = <e_i|e_j>, bordered by the normalization constraint
        let mut b = DMatrix::<Complex64>::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..n {
                b[(i, j)] = self.error_vectors[i]
                    .iter()
                    .zip(&self.error_vectors[j])
                    .map(|(ei, ej)| ei.dotc(ej))
                    .sum();
            }
            b[(i, n)] = c64(-1.0);
            b[(n, i)] = c64(-1.0);
        }

        // Scale the error block to O(1); error vectors at round-off level
        // carry no information to extrapolate from
        let scale = (0..n).map(|i| b[(i, i)].re).fold(0.0, f64::max);
        if scale < ERROR_FLOOR {
            debug!("DIIS error vectors vanish, keeping the latest Fock matrix");
            return None;
        }
        for i in 0..n {
            for j in 0..n {
                b[(i, j)] /= scale;
            }
        }

        let mut rhs = DVector::<Complex64>::zeros(n + 1);
        rhs[n] = c64(-1.0);

        let coeffs = match b.lu().solve(&rhs) {
            Some(x) => x,
            None => {
                debug!("DIIS extrapolation failed: singular B matrix");
                return None;
            }
        };

        let template = &self.fock_matrices[0];
        let mut extrapolated: SpinKpts<CMatrix> = [
            template[0].iter().map(|f| CMatrix::zeros(f.nrows(), f.ncols())).collect(),
            template[1].iter().map(|f| CMatrix::zeros(f.nrows(), f.ncols())).collect(),
        ];
        for (i, fock) in self.fock_matrices.iter().enumerate() {
            for s in 0..2 {
                for (acc, f) in extrapolated[s].iter_mut().zip(&fock[s]) {
                    *acc += f * coeffs[i];
                }
            }
        }
        debug!("DIIS extrapolation with {} vectors", n);
        Some(extrapolated)
    }
}

impl Extrapolator for KDiis {
    fn update(
        &mut self,
        s1e: &[CMatrix],
        dm: &SpinKpts<CMatrix>,
        fock: SpinKpts<CMatrix>,
        _h1e: &[CMatrix],
        _vhf: &SpinKpts<CMatrix>,
    ) -> Result<SpinKpts<CMatrix>> {
        let errors = Self::error_vector(s1e, dm, &fock)?;
        self.push(errors, fock);
        match self.extrapolate() {
            Some(f) => Ok(f),
            None => Ok(self
                .fock_matrices
                .back()
                .cloned()
                .unwrap_or_else(|| [Vec::new(), Vec::new()])),
        }
    }

    fn reset(&mut self) {
        self.error_vectors.clear();
        self.fock_matrices.clear();
    }
}
