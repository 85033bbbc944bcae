//! SCF checkpoint files
//!
//! A checkpoint is a JSON document with a `cell` and an `scf` section. The
//! `scf` section mirrors the usual SCF record: `e_tot`, `kpts` (or a single
//! `kpt`), `mo_energy`, `mo_coeff` and `mo_occ`. Orbital data is stored as
//! nested lists whose meaning depends on whether `kpts` is present:
//!
//! | `kpts` | `mo_coeff` layout        | interpretation                 |
//! |--------|--------------------------|--------------------------------|
//! | no     | matrix                   | restricted, single k-point     |
//! | no     | `[matrix, matrix]`       | unrestricted, single k-point   |
//! | yes    | `[matrix, ...]`          | restricted, one per k-point    |
//! | yes    | `[[matrix, ...], [...]]` | unrestricted, spin then k-point |

use crate::cell::Cell;
use crate::error::{KscfError, Result};
use crate::linalg::{CMatrix, SpinKpts};
use nalgebra::{DVector, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Dense matrix in row-major order; `im` is omitted for real matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub nrows: usize,
    pub ncols: usize,
    pub re: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub im: Option<Vec<f64>>,
}

impl MatrixRecord {
    pub fn from_matrix(m: &CMatrix) -> Self {
        let (nrows, ncols) = m.shape();
        let mut re = Vec::with_capacity(nrows * ncols);
        let mut im = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                re.push(m[(i, j)].re);
                im.push(m[(i, j)].im);
            }
        }
        let im = im.iter().any(|&x| x != 0.0).then_some(im);
        MatrixRecord {
            nrows,
            ncols,
            re,
            im,
        }
    }

    pub fn to_matrix(&self) -> Result<CMatrix> {
        let size = self.nrows * self.ncols;
        let im_len = self.im.as_ref().map_or(size, |im| im.len());
        if self.re.len() != size || im_len != size {
            return Err(KscfError::ChkLayout(format!(
                "matrix record of shape ({}, {}) holds {} real / {} imaginary values",
                self.nrows,
                self.ncols,
                self.re.len(),
                im_len
            )));
        }
        Ok(CMatrix::from_fn(self.nrows, self.ncols, |i, j| {
            let idx = i * self.ncols + j;
            let im = self.im.as_ref().map_or(0.0, |im| im[idx]);
            Complex64::new(self.re[idx], im)
        }))
    }
}

/// Arbitrarily nested list with leaves of type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Nested<T> {
    Leaf(T),
    List(Vec<Nested<T>>),
}

impl<T> Nested<T> {
    fn into_leaf(self) -> Option<T> {
        match self {
            Nested::Leaf(x) => Some(x),
            Nested::List(_) => None,
        }
    }

    /// A flat list of leaves.
    fn into_leaves(self) -> Option<Vec<T>> {
        match self {
            Nested::List(items) => items.into_iter().map(Nested::into_leaf).collect(),
            Nested::Leaf(_) => None,
        }
    }

    /// A pair of flat lists of leaves.
    fn into_leaf_pair(self) -> Option<[Vec<T>; 2]> {
        match self {
            Nested::List(items) if items.len() == 2 => {
                let mut it = items.into_iter().map(Nested::into_leaves);
                let a = it.next()??;
                let b = it.next()??;
                Some([a, b])
            }
            _ => None,
        }
    }

    fn first_is_leaf(&self) -> bool {
        match self {
            Nested::List(items) => matches!(items.first(), Some(Nested::Leaf(_))),
            Nested::Leaf(_) => false,
        }
    }
}

/// On-disk SCF record; every field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawScfRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tot: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpt: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpts: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mo_energy: Option<Nested<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mo_coeff: Option<Nested<MatrixRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mo_occ: Option<Nested<Vec<f64>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChkFile {
    pub cell: Cell,
    pub scf: RawScfRecord,
}

/// Orbitals stored in a checkpoint, one entry per checkpoint k-point.
#[derive(Debug, Clone, PartialEq)]
pub enum ChkOrbitals {
    /// Spin-summed orbitals with occupations in `[0, 2]`.
    Restricted {
        mo_coeff: Vec<CMatrix>,
        mo_occ: Vec<DVector<f64>>,
    },
    Unrestricted {
        mo_coeff: SpinKpts<CMatrix>,
        mo_occ: SpinKpts<DVector<f64>>,
    },
}

impl ChkOrbitals {
    /// Alpha/beta orbitals and occupations. Restricted occupations are split
    /// as `alpha = (occ > 1e-8)`, `beta = occ - alpha`.
    pub fn into_spin_orbitals(self) -> (SpinKpts<CMatrix>, SpinKpts<DVector<f64>>) {
        match self {
            ChkOrbitals::Unrestricted { mo_coeff, mo_occ } => (mo_coeff, mo_occ),
            ChkOrbitals::Restricted { mo_coeff, mo_occ } => {
                let occ_a: Vec<DVector<f64>> = mo_occ
                    .iter()
                    .map(|occ| occ.map(|x| if x > 1e-8 { 1.0 } else { 0.0 }))
                    .collect();
                let occ_b: Vec<DVector<f64>> =
                    mo_occ.iter().zip(&occ_a).map(|(occ, a)| occ - a).collect();
                ([mo_coeff.clone(), mo_coeff], [occ_a, occ_b])
            }
        }
    }
}

/// Interpreted SCF record.
#[derive(Debug, Clone, PartialEq)]
pub struct ScfRecord {
    pub e_tot: Option<f64>,
    /// The `kpts` entry, if the record has one.
    pub kpts: Option<Vec<Vector3<f64>>>,
    /// K-points the orbitals were computed at: `kpt`, else `kpts`, else the
    /// origin.
    pub chk_kpts: Vec<Vector3<f64>>,
    pub orbitals: ChkOrbitals,
}

fn to_matrices(records: Vec<MatrixRecord>) -> Result<Vec<CMatrix>> {
    records.iter().map(MatrixRecord::to_matrix).collect()
}

fn to_vectors(values: Vec<Vec<f64>>) -> Vec<DVector<f64>> {
    values.into_iter().map(DVector::from_vec).collect()
}

fn layout_error(what: &str) -> KscfError {
    KscfError::ChkLayout(format!("unexpected nesting of `{what}`"))
}

fn interpret_orbitals(
    has_kpts: bool,
    mo_coeff: Nested<MatrixRecord>,
    mo_occ: Nested<Vec<f64>>,
) -> Result<ChkOrbitals> {
    let restricted = if has_kpts {
        mo_coeff.first_is_leaf()
    } else {
        matches!(mo_coeff, Nested::Leaf(_))
    };

    if restricted {
        let (mo, occ) = if has_kpts {
            (
                mo_coeff.into_leaves().ok_or_else(|| layout_error("mo_coeff"))?,
                mo_occ.into_leaves().ok_or_else(|| layout_error("mo_occ"))?,
            )
        } else {
            (
                vec![mo_coeff.into_leaf().ok_or_else(|| layout_error("mo_coeff"))?],
                vec![mo_occ.into_leaf().ok_or_else(|| layout_error("mo_occ"))?],
            )
        };
        return Ok(ChkOrbitals::Restricted {
            mo_coeff: to_matrices(mo)?,
            mo_occ: to_vectors(occ),
        });
    }

    let (mo, occ) = if has_kpts {
        (
            mo_coeff.into_leaf_pair().ok_or_else(|| layout_error("mo_coeff"))?,
            mo_occ.into_leaf_pair().ok_or_else(|| layout_error("mo_occ"))?,
        )
    } else {
        let [mo_a, mo_b] = mo_coeff
            .into_leaves()
            .and_then(pair)
            .ok_or_else(|| layout_error("mo_coeff"))?;
        let [occ_a, occ_b] = mo_occ
            .into_leaves()
            .and_then(pair)
            .ok_or_else(|| layout_error("mo_occ"))?;
        ([vec![mo_a], vec![mo_b]], [vec![occ_a], vec![occ_b]])
    };

    let [mo_a, mo_b] = mo;
    let [occ_a, occ_b] = occ;
    Ok(ChkOrbitals::Unrestricted {
        mo_coeff: [to_matrices(mo_a)?, to_matrices(mo_b)?],
        mo_occ: [to_vectors(occ_a), to_vectors(occ_b)],
    })
}

fn pair<T>(items: Vec<T>) -> Option<[T; 2]> {
    <[T; 2]>::try_from(items).ok()
}

impl ScfRecord {
    pub fn from_raw(raw: RawScfRecord) -> Result<Self> {
        let kpts: Option<Vec<Vector3<f64>>> = raw
            .kpts
            .map(|ks| ks.into_iter().map(Vector3::from).collect());
        let chk_kpts = match (&raw.kpt, &kpts) {
            (Some(kpt), _) => {
                if kpt.len() % 3 != 0 || kpt.is_empty() {
                    return Err(KscfError::ChkLayout(format!(
                        "`kpt` holds {} values, expected a multiple of 3",
                        kpt.len()
                    )));
                }
                kpt.chunks(3).map(Vector3::from_column_slice).collect()
            }
            (None, Some(kpts)) => kpts.clone(),
            (None, None) => vec![Vector3::zeros()],
        };
        let mo_coeff = raw.mo_coeff.ok_or(KscfError::ChkMissing("mo_coeff"))?;
        let mo_occ = raw.mo_occ.ok_or(KscfError::ChkMissing("mo_occ"))?;
        let orbitals = interpret_orbitals(kpts.is_some(), mo_coeff, mo_occ)?;
        Ok(ScfRecord {
            e_tot: raw.e_tot,
            kpts,
            chk_kpts,
            orbitals,
        })
    }
}

/// Reads the cell and SCF record of a checkpoint file.
pub fn load_scf(path: &Path) -> Result<(Cell, ScfRecord)> {
    let name = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| KscfError::ChkIo {
        path: name.clone(),
        source,
    })?;
    let chk: ChkFile = serde_json::from_str(&content)
        .map_err(|source| KscfError::ChkFormat { path: name, source })?;
    let record = ScfRecord::from_raw(chk.scf)?;
    Ok((chk.cell, record))
}

/// Writes an unrestricted k-point SCF record.
pub fn dump_scf(
    path: &Path,
    cell: &Cell,
    e_tot: f64,
    kpts: &[Vector3<f64>],
    mo_energy: &SpinKpts<DVector<f64>>,
    mo_coeff: &SpinKpts<CMatrix>,
    mo_occ: &SpinKpts<DVector<f64>>,
) -> Result<()> {
    let spin_list = |per_spin: &SpinKpts<DVector<f64>>| {
        Nested::List(
            per_spin
                .iter()
                .map(|ks| {
                    Nested::List(ks.iter().map(|v| Nested::Leaf(v.as_slice().to_vec())).collect())
                })
                .collect(),
        )
    };
    let coeff = Nested::List(
        mo_coeff
            .iter()
            .map(|ks| {
                Nested::List(
                    ks.iter()
                        .map(|c| Nested::Leaf(MatrixRecord::from_matrix(c)))
                        .collect(),
                )
            })
            .collect(),
    );
    let chk = ChkFile {
        cell: cell.clone(),
        scf: RawScfRecord {
            e_tot: Some(e_tot),
            kpt: None,
            kpts: Some(kpts.iter().map(|k| [k.x, k.y, k.z]).collect()),
            mo_energy: Some(spin_list(mo_energy)),
            mo_coeff: Some(coeff),
            mo_occ: Some(spin_list(mo_occ)),
        },
    };

    let name = path.display().to_string();
    let json = serde_json::to_string(&chk).map_err(|source| KscfError::ChkFormat {
        path: name.clone(),
        source,
    })?;
    fs::write(path, json).map_err(|source| KscfError::ChkIo { path: name, source })?;
    info!("SCF results written to {}", path.display());
    Ok(())
}
