use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::framing;
use crate::{Error, Result, RECORD_FILE_SUFFIX};

/// Framed record writer over any byte sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> RecordWriter<W> {
        RecordWriter { inner, records: 0 }
    }

    pub fn write_record(&mut self, data: &[u8]) -> Result {
        framing::write_record(&mut self.inner, data)?;
        self.records += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Paths and record count of a finished dataset split.
#[derive(Clone, Debug, Default)]
pub struct ShardSet {
    pub records: u64,
    pub shards: Vec<PathBuf>,
}

/// Suffix of a shard that is still being written.
const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Writes gzip compressed record shards of bounded size into one directory.
///
/// Shards are written under an `.incomplete` name that the dataset scan
/// skips and renamed on [`ShardedRecordWriter::finish`] once the total is
/// known, so a finished dataset always carries consistent `-of-` stamps and
/// a crashed run leaves no files that look complete.
pub struct ShardedRecordWriter {
    directory: PathBuf,
    prefix: String,
    records_per_shard: u64,
    shard: Option<RecordWriter<GzEncoder<BufWriter<File>>>>,
    completed: Vec<PathBuf>,
    records: u64,
}

impl ShardedRecordWriter {
    pub fn create(
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        records_per_shard: u64,
    ) -> Result<ShardedRecordWriter> {
        if records_per_shard == 0 {
            return Err(Error::InvalidArgument(
                "records_per_shard has to be positive".to_string(),
            ));
        }

        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        Ok(ShardedRecordWriter {
            directory,
            prefix: prefix.into(),
            records_per_shard,
            shard: None,
            completed: Vec::new(),
            records: 0,
        })
    }

    pub fn write_record(&mut self, data: &[u8]) -> Result {
        if self.shard.is_none() {
            self.open_shard()?;
        }

        let mut full = false;
        if let Some(writer) = self.shard.as_mut() {
            writer.write_record(data)?;
            full = writer.records_written() >= self.records_per_shard;
        }
        self.records += 1;

        if full {
            self.close_shard()?;
        }

        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Close the open shard and stamp every file with the final shard count.
    ///
    /// An empty writer produces no files at all.
    pub fn finish(mut self) -> Result<ShardSet> {
        self.close_shard()?;

        let total = self.completed.len();
        let mut shards = Vec::with_capacity(total);
        for (index, path) in self.completed.iter().enumerate() {
            let target = self.directory.join(format!(
                "{}-{:05}-of-{:05}{}",
                self.prefix, index, total, RECORD_FILE_SUFFIX
            ));
            fs::rename(path, &target)?;
            shards.push(target);
        }

        Ok(ShardSet {
            records: self.records,
            shards,
        })
    }

    fn shard_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!(
            "{}-{:05}{}{}",
            self.prefix, index, RECORD_FILE_SUFFIX, INCOMPLETE_SUFFIX
        ))
    }

    fn open_shard(&mut self) -> Result {
        let file = File::create(self.shard_path(self.completed.len()))?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        self.shard = Some(RecordWriter::new(encoder));
        Ok(())
    }

    fn close_shard(&mut self) -> Result {
        if let Some(writer) = self.shard.take() {
            let path = self.shard_path(self.completed.len());
            let mut inner = writer.into_inner().finish()?;
            inner.flush()?;
            self.completed.push(path);
        }

        Ok(())
    }
}
