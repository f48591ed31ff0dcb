#![warn(clippy::unwrap_used)]

//! Training dataset generation against a remote raster service.
//!
//! The patch pipeline enumerates a sample collection, downloads a fixed size
//! multi band neighborhood around every sample, filters out patches with non
//! finite values and writes the survivors as named float feature records into
//! sharded train/validation/test streams. The point pipeline exports per
//! point band values through the same record sink.

pub type Result<T = ()> = std::result::Result<T, Error>;

pub mod backend;
mod error;
pub mod httpbackend;
mod pipeline;
mod points;
mod retry;
mod split;
pub mod validate;

pub use backend::RasterBackend;
pub use backend::SessionFactory;
#[doc(inline)]
pub use error::Error;
pub use error::FetchError;
pub use httpbackend::BackendConfig;
pub use httpbackend::HttpRasterBackend;
pub use httpbackend::HttpSessionFactory;
pub use pipeline::DatasetReport;
pub use pipeline::FetchMode;
pub use pipeline::PatchPipelineOptions;
pub use points::PointPipelineOptions;
pub use points::PointReport;
pub use retry::RetryPolicy;
pub use split::Split;
pub use split::SplitCounts;
pub use split::SplitRatios;
pub use split::SplitSampler;
