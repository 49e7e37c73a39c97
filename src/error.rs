use thiserror::Error;

/// Errors surfaced by dataset construction, training and decoding.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected at an API boundary (empty sequence, zero labels,
    /// mismatched lengths, out-of-range parameter).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A feature emitted by a generator failed insert-time validation.
    #[error("invalid feature: {0}")]
    InvalidFeature(String),

    /// A segmentation does not form an ordered, gap-free cover.
    #[error("invalid segmentation: {0}")]
    InvalidSegmentation(String),

    /// A NaN or non-finite value appeared where the engine cannot recover.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Training was interrupted through a cancel token.
    #[error("training cancelled")]
    Cancelled,

    /// The outer optimizer reported a hard failure.
    #[error("optimizer failure: {0}")]
    Optimizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}
