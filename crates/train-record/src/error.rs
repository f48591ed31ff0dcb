use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Record stream ends in the middle of a record")]
    TruncatedRecord,
    #[error("Record {part} checksum mismatch")]
    ChecksumMismatch { part: &'static str },
    #[error("Malformed example payload: {0}")]
    MalformedMessage(String),
    #[error("Unsupported feature encoding: {0}")]
    UnsupportedFeature(String),
}
