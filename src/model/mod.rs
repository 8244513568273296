mod block;
pub mod conv;
pub mod init;
pub mod norm;
pub mod wavenet;

pub use block::*;
pub use conv::*;
pub use init::*;
pub use norm::*;
pub use wavenet::*;

use thiserror::Error;

/// Errors raised while building or running the acoustic model.
///
/// Everything except [`ShapeMismatch`](WaveNetError::ShapeMismatch) is detected
/// while the network is constructed, before any module is returned to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaveNetError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parameter `{0}` is already registered")]
    DuplicateParameter(String),

    #[error("Unsupported tensor rank {0} for batch normalization")]
    UnsupportedRank(usize),

    #[error("Unsupported padding mode `{0}`, expected `SAME` or `VALID`")]
    UnsupportedPadding(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}
