//! Crystal cell description and k-point meshes

use crate::error::{KscfError, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Periodic cell as seen by the SCF: lattice, electron count and spin.
///
/// Lattice vectors are the rows of `lattice` (Bohr). `spin` is the number
/// of unpaired electrons, `N_alpha - N_beta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub lattice: Matrix3<f64>,
    pub nelectron: usize,
    #[serde(default)]
    pub spin: usize,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub natm: usize,
}

fn default_dimension() -> usize {
    3
}

impl Cell {
    pub fn new(lattice: Matrix3<f64>, nelectron: usize, spin: usize) -> Self {
        Cell {
            lattice,
            nelectron,
            spin,
            dimension: 3,
            natm: 0,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_natm(mut self, natm: usize) -> Self {
        self.natm = natm;
        self
    }

    /// Alpha and beta electrons per cell, `(N - n_b, n_b)` with
    /// `n_b = (N - spin) / 2`.
    pub fn nelec(&self) -> (usize, usize) {
        let n_b = self.nelectron.saturating_sub(self.spin) / 2;
        (self.nelectron - n_b, n_b)
    }

    /// Reciprocal lattice vectors as rows, `b_i . a_j = 2 pi delta_ij`, or
    /// an error for linearly dependent lattice vectors.
    pub fn try_reciprocal_vectors(&self) -> Result<Matrix3<f64>> {
        self.lattice
            .try_inverse()
            .map(|inv| inv.transpose() * (2.0 * PI))
            .ok_or_else(|| KscfError::Config("lattice vectors are linearly dependent".into()))
    }

    /// Reciprocal lattice vectors as rows.
    ///
    /// The lattice must be non-singular (checked by
    /// [`Cell::try_reciprocal_vectors`]); a singular lattice yields zero
    /// vectors, which collapses every mesh onto the gamma point.
    pub fn reciprocal_vectors(&self) -> Matrix3<f64> {
        self.try_reciprocal_vectors()
            .unwrap_or_else(|_| Matrix3::zeros())
    }

    /// Gamma-centred uniform mesh of absolute k-points.
    pub fn make_kpts(&self, mesh: [usize; 3]) -> Vec<Vector3<f64>> {
        let b = self.reciprocal_vectors();
        let mut kpts = Vec::with_capacity(mesh.iter().product());
        for i in 0..mesh[0].max(1) {
            for j in 0..mesh[1].max(1) {
                for k in 0..mesh[2].max(1) {
                    let frac = Vector3::new(
                        i as f64 / mesh[0].max(1) as f64,
                        j as f64 / mesh[1].max(1) as f64,
                        k as f64 / mesh[2].max(1) as f64,
                    );
                    kpts.push(b.transpose() * frac);
                }
            }
        }
        kpts
    }

    /// Absolute k-points in units of the reciprocal lattice vectors.
    pub fn get_scaled_kpts(&self, kpts: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        kpts.iter()
            .map(|k| self.lattice * k / (2.0 * PI))
            .collect()
    }

    /// Inverse of [`Cell::get_scaled_kpts`].
    pub fn get_abs_kpts(&self, scaled_kpts: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let b = self.reciprocal_vectors();
        scaled_kpts.iter().map(|f| b.transpose() * f).collect()
    }

    /// Cartesian lattice translation `R` with integer coordinates `image`.
    pub fn translation(&self, image: [i32; 3]) -> Vector3<f64> {
        self.lattice.transpose()
            * Vector3::new(image[0] as f64, image[1] as f64, image[2] as f64)
    }
}

/// True when every k-point sits at the origin.
pub fn is_gamma_only(kpts: &[Vector3<f64>]) -> bool {
    kpts.iter().all(|k| k.iter().all(|&x| x.abs() < 1e-8))
}

/// Element-wise `allclose` with numpy's default tolerances.
pub fn kpts_allclose(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.iter()
                .zip(y.iter())
                .all(|(p, q)| (p - q).abs() <= 1e-8 + 1e-5 * q.abs())
        })
}

/// Index of the k-point in `mesh` closest to `kpt` in Euclidean distance.
/// Ties resolve to the first candidate.
pub fn nearest_kpt(mesh: &[Vector3<f64>], kpt: &Vector3<f64>) -> Option<usize> {
    mesh.iter()
        .enumerate()
        .map(|(i, k)| (i, (k - kpt).norm()))
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
}
