//! Tight-binding lattice model with an on-site Hubbard interaction
//!
//! The model supplies every integral `KUHF` needs without a Gaussian basis:
//! Bloch sums of real-space hopping and overlap terms for the one-electron
//! part and a contact interaction `U_i n_i,up n_i,down` for the two-electron
//! part. With a contact interaction both Coulomb and exchange are diagonal
//! and k-independent, `J_s = K_s = diag(U_i n_{i,s})`, so
//! `veff_s = J_a + J_b - K_s = diag(U_i n_{i,-s})`.

use crate::cell::Cell;
use crate::error::{KscfError, Result};
use crate::linalg::{c64, real_part, CMatrix, SpinKpts};
use crate::service::{ExxDiv, JkPair, KptsService};
use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Matrix element `<from, 0| X |to, R>` with `R` the lattice translation
/// `image`. The Hermitian partner is added automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeTerm {
    pub from: usize,
    pub to: usize,
    #[serde(default)]
    pub image: [i32; 3],
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeModel {
    /// On-site energies, one per orbital.
    pub onsite: Vec<f64>,
    /// Contact interaction per orbital. Empty means non-interacting.
    #[serde(default)]
    pub hubbard_u: Vec<f64>,
    #[serde(default)]
    pub hoppings: Vec<LatticeTerm>,
    /// Off-diagonal overlap terms; the on-site overlap is the identity.
    #[serde(default)]
    pub overlaps: Vec<LatticeTerm>,
}

impl LatticeModel {
    pub fn new(onsite: Vec<f64>) -> Self {
        LatticeModel {
            onsite,
            hubbard_u: Vec::new(),
            hoppings: Vec::new(),
            overlaps: Vec::new(),
        }
    }

    pub fn with_hubbard_u(mut self, u: Vec<f64>) -> Self {
        self.hubbard_u = u;
        self
    }

    pub fn with_hopping(mut self, from: usize, to: usize, image: [i32; 3], value: f64) -> Self {
        self.hoppings.push(LatticeTerm {
            from,
            to,
            image,
            value,
        });
        self
    }

    pub fn with_overlap(mut self, from: usize, to: usize, image: [i32; 3], value: f64) -> Self {
        self.overlaps.push(LatticeTerm {
            from,
            to,
            image,
            value,
        });
        self
    }

    /// Rejects out-of-range orbital indices and mis-sized parameter lists.
    pub fn validate(&self) -> Result<()> {
        let nao = self.onsite.len();
        if nao == 0 {
            return Err(KscfError::Config("lattice model has no orbitals".into()));
        }
        if !self.hubbard_u.is_empty() && self.hubbard_u.len() != nao {
            return Err(KscfError::shape("hubbard_u", nao, self.hubbard_u.len()));
        }
        for term in self.hoppings.iter().chain(&self.overlaps) {
            if term.from >= nao || term.to >= nao {
                return Err(KscfError::Config(format!(
                    "lattice term {} -> {} references a missing orbital (nao = {})",
                    term.from, term.to, nao
                )));
            }
            if term.from == term.to && term.image == [0, 0, 0] {
                return Err(KscfError::Config(format!(
                    "on-site term on orbital {} belongs in `onsite`",
                    term.from
                )));
            }
        }
        Ok(())
    }

    fn bloch_sum(&self, cell: &Cell, terms: &[LatticeTerm], kpt: &Vector3<f64>) -> CMatrix {
        let nao = self.nao();
        let mut m = CMatrix::zeros(nao, nao);
        for term in terms {
            let r = cell.translation(term.image);
            let phase = Complex64::from_polar(1.0, kpt.dot(&r));
            m[(term.from, term.to)] += phase * term.value;
            m[(term.to, term.from)] += phase.conj() * term.value;
        }
        m
    }

    fn interaction(&self, orbital: usize) -> f64 {
        self.hubbard_u.get(orbital).copied().unwrap_or(0.0)
    }

    /// Real-space on-site occupations `n_{i,s} = 1/nk sum_k Re D_s(k)_ii`.
    fn site_occupations(&self, dm: &[CMatrix]) -> DVector<f64> {
        let nao = self.nao();
        let nkpts = dm.len().max(1) as f64;
        DVector::from_fn(nao, |i, _| {
            dm.iter().map(|d| d[(i, i)].re).sum::<f64>() / nkpts
        })
    }

    fn gamma_overlap_inverse(&self, cell: &Cell) -> Result<DMatrix<f64>> {
        let s = self.bloch_sum(cell, &self.overlaps, &Vector3::zeros()) + CMatrix::identity(self.nao(), self.nao());
        real_part(&s)
            .try_inverse()
            .ok_or_else(|| KscfError::Linalg("gamma-point overlap is singular".into()))
    }
}

impl KptsService for LatticeModel {
    fn nao(&self) -> usize {
        self.onsite.len()
    }

    fn get_hcore(&self, cell: &Cell, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>> {
        let diag = DVector::from_iterator(self.nao(), self.onsite.iter().map(|&e| c64(e)));
        Ok(kpts
            .iter()
            .map(|k| CMatrix::from_diagonal(&diag) + self.bloch_sum(cell, &self.hoppings, k))
            .collect())
    }

    fn get_ovlp(&self, cell: &Cell, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>> {
        let nao = self.nao();
        Ok(kpts
            .iter()
            .map(|k| CMatrix::identity(nao, nao) + self.bloch_sum(cell, &self.overlaps, k))
            .collect())
    }

    fn get_jk(
        &self,
        _cell: &Cell,
        dm: &SpinKpts<CMatrix>,
        kpts: &[Vector3<f64>],
        kpts_band: Option<&[Vector3<f64>]>,
        _exxdiv: ExxDiv,
    ) -> Result<JkPair> {
        let nao = self.nao();
        for spin_dm in dm.iter() {
            if spin_dm.len() != kpts.len() {
                return Err(KscfError::shape("get_jk: density k-points", kpts.len(), spin_dm.len()));
            }
            crate::linalg::check_square("get_jk: density", spin_dm, nao)?;
        }
        let nband = kpts_band.map_or(kpts.len(), |band| band.len());

        let potential = |spin_dm: &[CMatrix]| -> Vec<CMatrix> {
            let n = self.site_occupations(spin_dm);
            let diag = DVector::from_fn(nao, |i, _| c64(self.interaction(i) * n[i]));
            vec![CMatrix::from_diagonal(&diag); nband]
        };
        let va = potential(&dm[0]);
        let vb = potential(&dm[1]);
        Ok(([va.clone(), vb.clone()], [va, vb]))
    }

    fn init_guess_by_atom(&self, cell: &Cell) -> Result<[DMatrix<f64>; 2]> {
        let s_inv = self.gamma_overlap_inverse(cell)?;
        let per_orbital = cell.nelectron as f64 * 0.5 / self.nao() as f64;
        let dm = s_inv * per_orbital;
        Ok([dm.clone(), dm])
    }

    fn init_guess_by_minao(&self, cell: &Cell) -> Result<[DMatrix<f64>; 2]> {
        let s_inv = self.gamma_overlap_inverse(cell)?;
        let (na, nb) = cell.nelec();
        let nao = self.nao() as f64;
        Ok([&s_inv * (na as f64 / nao), &s_inv * (nb as f64 / nao)])
    }
}
