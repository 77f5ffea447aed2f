// THEORY:
// Every failure the engine can surface is one of a small, closed set of kinds.
// The numeric stages never fail on their own: they only reject inputs whose
// dimensions disagree. Decoding happens before any artifact is written, and
// storage failures abort the comparison as a whole, so a caller either gets a
// complete `ComparisonResult` or one of these errors, never a mix of the two.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the artifact storage seam.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The session namespace already exists. A fresh key must be generated.
    #[error("artifact session `{key}` already exists")]
    Collision { key: String },

    /// The key cannot be used to name a storage namespace.
    #[error("invalid session key `{0}`: only ASCII letters, digits, `-` and `_` are allowed")]
    InvalidKey(String),

    /// An artifact was written to a session that was never opened.
    #[error("artifact session `{key}` was never opened")]
    UnknownSession { key: String },

    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode artifact `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: image::ImageError,
    },
}

/// Failures of a single comparison.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("input image cannot be decoded: {0}")]
    InvalidImage(String),

    /// Raised when two images reach a numeric stage with different sizes.
    /// After normalization this indicates a bug, not bad input.
    #[error("dimension mismatch: {left_w}x{left_h} vs {right_w}x{right_h}")]
    DimensionMismatch {
        left_w: u32,
        left_h: u32,
        right_w: u32,
        right_h: u32,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CompareError {
    pub(crate) fn mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        CompareError::DimensionMismatch {
            left_w: left.0,
            left_h: left.1,
            right_w: right.0,
            right_h: right.1,
        }
    }
}

impl From<image::ImageError> for CompareError {
    fn from(err: image::ImageError) -> Self {
        CompareError::InvalidImage(err.to_string())
    }
}

/// Failures of a page check: validation, capture, then comparison.
#[derive(Debug, Error)]
pub enum PageCheckError {
    /// A required request field is absent or empty.
    #[error("missing information: {0}")]
    MissingInformation(&'static str),

    #[error("unknown device type `{0}`")]
    UnknownDevice(String),

    #[error("page capture failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Compare(#[from] CompareError),

    #[error("comparison task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StorageError> for PageCheckError {
    fn from(err: StorageError) -> Self {
        PageCheckError::Compare(CompareError::Storage(err))
    }
}
