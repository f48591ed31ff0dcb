use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Empty band list")]
    EmptyBandList,
    #[error("Duplicate band name: {0}")]
    DuplicateBand(String),
    #[error("Band count mismatch: expected {expected}, got {actual}")]
    BandCount { expected: usize, actual: usize },
    #[error("Patch planes are not square ({rows}x{cols})")]
    PlaneShape { rows: usize, cols: usize },
    #[error("Patch dimensions do not match ({}x{}) <-> ({}x{})", .expected, .expected, .actual.0, .actual.1)]
    PatchSize { expected: usize, actual: (usize, usize) },
    #[error("Unknown composite window: {0}")]
    UnknownWindow(String),
    #[error("Invalid NPY payload: {0}")]
    Npy(String),
}
