//! K-point sampled unrestricted Hartree-Fock for periodic systems
//!
//! ```no_run
//! use nalgebra::{Matrix3, Vector3};
//! use pbc_kuhf::{Cell, LatticeModel, KUHF};
//!
//! let cell = Cell::new(Matrix3::from_diagonal(&Vector3::new(4.0, 10.0, 10.0)), 2, 0).with_natm(2);
//! let model = LatticeModel::new(vec![0.0, 0.0])
//!     .with_hubbard_u(vec![4.0, 4.0])
//!     .with_hopping(0, 1, [0, 0, 0], -1.0)
//!     .with_hopping(1, 0, [1, 0, 0], -1.0);
//! let kpts = cell.make_kpts([4, 1, 1]);
//! let mut mf = KUHF::new(cell, kpts, model);
//! let e_tot = mf.kernel(None).unwrap();
//! ```

pub mod cell;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod kscf_impl;
pub mod linalg;
pub mod model;
pub mod service;

pub use cell::Cell;
pub use diagnostics::{Diagnostic, DiagnosticsSink, RecordingSink, TracingSink};
pub use error::{KscfError, Result};
pub use kscf_impl::{Extrapolator, KDiis, LevelShift, Spin, KUHF};
pub use model::LatticeModel;
pub use service::{ExxDiv, KptsService};
