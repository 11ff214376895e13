//! Write-Ahead Log for durability and recovery.
//!
//! The WAL logs every mutation before it reaches the memtable, so committed
//! writes survive sudden process termination. It is a single append-only
//! UTF-8 text file with one `key=value` record per line; tombstones are
//! written as the tombstone marker (see [`crate::encoding`]).
//!
//! `append` flushes and fsyncs before returning: a write that has been
//! acknowledged is on disk. The file is truncated by the engine only once
//! every memtable it covers has been persisted to an SSTable.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::encoding;
use crate::error::Result;

/// Append-only durable log of writes.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl Wal {
    /// Opens the WAL at `path`, creating it if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and makes it durable before returning. A `None`
    /// value records a tombstone.
    pub fn append(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut writer = self.writer.lock()?;
        writeln!(writer, "{}", encoding::encode_line(key, value))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Truncates the log to empty and reopens it for appending.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock()?;
        writer.flush()?;
        // Truncate with a throwaway handle, then swap in a fresh appender.
        File::create(&self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *writer = BufWriter::new(file);
        Ok(())
    }

    /// Returns an iterator over the logged records, oldest first.
    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::new(&self.path)
    }

    /// Flushes and syncs any buffered writes.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Iterator over WAL records. Malformed lines (no `=` separator or an empty
/// key) are skipped with a warning; read failures are surfaced.
pub struct ReplayIterator {
    lines: Lines<BufReader<File>>,
}

impl ReplayIterator {
    fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<(String, Option<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            match encoding::decode_line(&line) {
                Some((key, value)) => {
                    return Some(Ok((key.to_string(), value.map(String::from))));
                }
                None => {
                    tracing::warn!(line = %line, "skipping malformed wal record");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn create_temp_wal(temp_dir: &TempDir) -> Wal {
        Wal::open(temp_dir.path().join("wal.log")).expect("Failed to open WAL")
    }

    fn collect(wal: &Wal) -> Vec<(String, Option<String>)> {
        wal.replay()
            .expect("Failed to create replay iterator")
            .collect::<Result<Vec<_>>>()
            .expect("Replay failed")
    }

    #[test]
    fn test_append_and_replay() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);

        wal.append("key1", Some("value1")).expect("Failed to append");
        wal.append("key2", Some("value2")).expect("Failed to append");
        wal.append("key3", None).expect("Failed to append tombstone");

        let entries = collect(&wal);
        assert_eq!(
            entries,
            vec![
                ("key1".to_string(), Some("value1".to_string())),
                ("key2".to_string(), Some("value2".to_string())),
                ("key3".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_empty_replay() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);
        assert!(collect(&wal).is_empty());
    }

    #[test]
    fn test_value_with_equals_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);

        wal.append("key", Some("value=with=equals")).unwrap();

        assert_eq!(
            collect(&wal),
            vec![("key".to_string(), Some("value=with=equals".to_string()))]
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);

        wal.append("good", Some("value")).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(wal.path())
                .unwrap();
            writeln!(file, "this line has no separator").unwrap();
            writeln!(file, "=empty key").unwrap();
        }
        wal.append("also_good", None).unwrap();

        let entries = collect(&wal);
        assert_eq!(
            entries,
            vec![
                ("good".to_string(), Some("value".to_string())),
                ("also_good".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_clear_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);

        wal.append("key1", Some("value1")).unwrap();
        wal.clear().expect("Failed to clear");

        assert!(collect(&wal).is_empty());
        assert_eq!(std::fs::metadata(wal.path()).unwrap().len(), 0);

        // The WAL accepts appends after truncation.
        wal.append("key2", Some("value2")).unwrap();
        assert_eq!(
            collect(&wal),
            vec![("key2".to_string(), Some("value2".to_string()))]
        );
    }

    #[test]
    fn test_empty_value_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let wal = create_temp_wal(&temp_dir);

        wal.append("key", Some("")).unwrap();
        assert_eq!(collect(&wal), vec![("key".to_string(), Some("".to_string()))]);
    }
}
