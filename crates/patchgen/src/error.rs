use thiserror::Error;

/// Failure of a single backend operation.
///
/// Transient failures are worth retrying against a fresh attempt of the same
/// request, the rest would fail the same way again.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Backend rate limit hit: {0}")]
    RateLimited(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend rejected the request ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("No sample at index {index} (collection size {size})")]
    OutOfRange { index: u64, size: u64 },
    #[error("Unusable backend payload: {0}")]
    Payload(String),
    #[error("Patch decode error: {0}")]
    Decode(#[from] patch::Error),
    #[error("Gave up after {attempts} attempts over {elapsed:.1?}")]
    BudgetExhausted {
        attempts: u32,
        elapsed: std::time::Duration,
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Rate limits and transport failures clear up on their own, everything
    /// else is permanent for the request that caused it.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::RateLimited(_) | FetchError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Backend error: {0}")]
    BackendError(#[from] FetchError),
    #[error("Patch error: {0}")]
    PatchError(#[from] patch::Error),
    #[error("Record error: {0}")]
    RecordError(#[from] train_record::Error),
}
