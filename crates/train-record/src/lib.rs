#![warn(clippy::unwrap_used)]

//! Length prefixed record files for training datasets.
//!
//! Shards are gzip compressed streams of framed records, each record carrying
//! a serialized example message with named float features. The framing and
//! the message layout follow what the common training toolchains read, so a
//! finished dataset can be consumed without conversion.

pub type Result<T = ()> = std::result::Result<T, Error>;

mod error;
mod example;
mod framing;
mod reader;
mod writer;

#[doc(inline)]
pub use error::Error;
pub use example::decode_example;
pub use example::encode_example;
pub use example::FeatureRecord;
pub use reader::read_dataset;
pub use reader::read_shard;
pub use reader::RecordReader;
pub use writer::RecordWriter;
pub use writer::ShardSet;
pub use writer::ShardedRecordWriter;

/// File suffix of every finished shard.
pub const RECORD_FILE_SUFFIX: &str = ".tfrecord.gz";
