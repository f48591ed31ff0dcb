use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::framing;
use crate::{Result, RECORD_FILE_SUFFIX};

/// Iterator over the framed records of a byte stream.
pub struct RecordReader<R: Read> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> RecordReader<R> {
        RecordReader { inner }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Result<Vec<u8>>> {
        framing::read_record(&mut self.inner).transpose()
    }
}

/// All records of one gzip compressed shard file.
pub fn read_shard(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path)?;
    RecordReader::new(GzDecoder::new(BufReader::new(file))).collect()
}

/// All records of the shards named `{prefix}-*` in `directory`, in shard
/// order.
pub fn read_dataset(directory: &Path, prefix: &str) -> Result<Vec<Vec<u8>>> {
    let stem = format!("{}-", prefix);

    let mut shards = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            if name.starts_with(&stem) && name.ends_with(RECORD_FILE_SUFFIX) {
                shards.push(path);
            }
        }
    }
    shards.sort();

    let mut records = Vec::new();
    for shard in &shards {
        records.append(&mut read_shard(shard)?);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{RecordWriter, ShardedRecordWriter};

    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(b"alpha").unwrap();
        writer.write_record(b"beta").unwrap();
        let stream = writer.into_inner();

        let records: Result<Vec<Vec<u8>>> = RecordReader::new(stream.as_slice()).collect();
        let records = records.unwrap();
        assert_eq!(records, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn dataset_preserves_record_order_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardedRecordWriter::create(dir.path(), "training", 3).unwrap();
        for index in 0..10u8 {
            writer.write_record(&[index]).unwrap();
        }
        let set = writer.finish().unwrap();
        assert_eq!(set.shards.len(), 4);

        let records = read_dataset(dir.path(), "training").unwrap();
        let values: Vec<u8> = records.iter().map(|record| record[0]).collect();
        assert_eq!(values, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn single_shard_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardedRecordWriter::create(dir.path(), "testing", 100).unwrap();
        writer.write_record(b"only").unwrap();
        let set = writer.finish().unwrap();

        let records = read_shard(&set.shards[0]).unwrap();
        assert_eq!(records, vec![b"only".to_vec()]);
    }

    #[test]
    fn dataset_scan_matches_on_the_full_prefix() {
        let dir = tempfile::tempdir().unwrap();

        let mut writer = ShardedRecordWriter::create(dir.path(), "training", 100).unwrap();
        writer.write_record(b"keep").unwrap();
        writer.finish().unwrap();

        let mut other = ShardedRecordWriter::create(dir.path(), "training2", 100).unwrap();
        other.write_record(b"skip").unwrap();
        other.write_record(b"skip").unwrap();
        other.finish().unwrap();

        fs::write(dir.path().join("notes.txt"), b"stray").unwrap();

        let records = read_dataset(dir.path(), "training").unwrap();
        assert_eq!(records, vec![b"keep".to_vec()]);
    }

    #[test]
    fn unfinished_shard_is_not_part_of_the_dataset() {
        let dir = tempfile::tempdir().unwrap();

        let mut finished = ShardedRecordWriter::create(dir.path(), "training", 100).unwrap();
        finished.write_record(b"complete").unwrap();
        finished.finish().unwrap();

        // A second run into the same directory that never reaches finish.
        let mut crashed = ShardedRecordWriter::create(dir.path(), "training", 100).unwrap();
        crashed.write_record(b"in flight").unwrap();
        drop(crashed);

        let records = read_dataset(dir.path(), "training").unwrap();
        assert_eq!(records, vec![b"complete".to_vec()]);
    }

    #[test]
    fn unreadable_shard_data_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("bad-00000-of-00001{}", RECORD_FILE_SUFFIX));
        fs::write(&path, b"definitely not gzip").unwrap();

        assert!(read_shard(&path).is_err());
    }
}
