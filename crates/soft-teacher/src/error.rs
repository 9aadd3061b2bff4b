use std::path::PathBuf;

use soft_teacher_loss::UnknownClassificationLoss;
use thiserror::Error;

/// The error type for Soft-Teacher experiment operations.
///
/// The loss functions themselves do not fail; this enum covers the
/// configuration, batch loading and validation that happen around them.
#[derive(Error, Debug)]
pub enum SoftTeacherError {
    /// Error for when an unsupported backbone network is specified.
    #[error("Unsupported backbone: {backbone}")]
    UnsupportedBackbone {
        /// The name of the unsupported backbone.
        backbone: String,
    },

    /// Error for when an unsupported classification loss is specified.
    #[error(transparent)]
    UnsupportedLossFunction(#[from] UnknownClassificationLoss),

    /// Error for when an experiment configuration is logically inconsistent.
    #[error("Invalid experiment configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when a box batch violates the per-box input contract.
    #[error("Invalid box batch: {reason}")]
    InvalidBatch {
        /// The reason why the batch is invalid.
        reason: String,
    },

    /// Error when reading or writing a file fails.
    #[error("I/O error on {path}")]
    Io {
        /// The file that could not be accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when a file does not contain the expected JSON document.
    #[error("Malformed JSON in {path}")]
    Json {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// A specialized `Result` type for Soft-Teacher experiment operations.
pub type SoftTeacherResult<T> = Result<T, SoftTeacherError>;
