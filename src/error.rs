//! Error types for the k-point UHF library.

use thiserror::Error;

/// Errors raised by the SCF machinery.
///
/// Checkpoint variants are recoverable: the initial guess falls back to the
/// minimal-basis guess when any of them is returned. `ImaginaryEnergy` is
/// fatal and indicates non-Hermitian input matrices.
#[derive(Debug, Error)]
pub enum KscfError {
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    Shape {
        context: &'static str,
        expected: String,
        found: String,
    },

    #[error("Coulomb energy has imaginary part {0:e}, something is wrong")]
    ImaginaryEnergy(f64),

    #[error("unable to read checkpoint {path}")]
    ChkIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint {path}")]
    ChkFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint has no `{0}` record")]
    ChkMissing(&'static str),

    #[error("unexpected checkpoint layout: {0}")]
    ChkLayout(String),

    #[error("linear algebra failure: {0}")]
    Linalg(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KscfError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        KscfError::Shape {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// True for failures the initial guess recovers from with a fallback.
    pub fn is_checkpoint_error(&self) -> bool {
        matches!(
            self,
            KscfError::ChkIo { .. }
                | KscfError::ChkFormat { .. }
                | KscfError::ChkMissing(_)
                | KscfError::ChkLayout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KscfError>;
