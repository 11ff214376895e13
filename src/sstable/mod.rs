//! On-disk sorted string tables.
//!
//! SSTables are immutable files of `key=value` lines in key order, produced
//! by flushing a memtable (plain `sstable_<N>.txt` files) or by compaction
//! (a single gzip-compressed `sstable_compacted.txt.gz`). Files are
//! published atomically: data is written to a uniquely named temp file,
//! fsynced, and renamed into place, so a reader never observes a partially
//! written table.
//!
//! [`SsTables`] owns the data directory and a per-file [`TableFilter`]
//! registry keyed by file name. The registry's `RwLock` doubles as the
//! reader/writer lock over directory operations: lookups take it shared,
//! table writes and compaction take it exclusive.
//!
//! Lookups scan files newest first and match a line by its `<key>=` prefix
//! rather than re-splitting it, so keys containing `=` still resolve to the
//! value they were stored with.

pub mod compaction;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;

use crate::encoding::TOMBSTONE;
use crate::error::Result;
use crate::filter::TableFilter;

const TABLE_PREFIX: &str = "sstable_";
const PLAIN_SUFFIX: &str = ".txt";
const GZ_SUFFIX: &str = ".gz";
pub(crate) const COMPACTED_FILE: &str = "sstable_compacted.txt.gz";
pub(crate) const COMPACTED_TEMP: &str = "sstable_compacted_temp.gz";

const RENAME_ATTEMPTS: u32 = 3;
const RENAME_BACKOFF: Duration = Duration::from_millis(50);

/// A data file in the table directory, with the metadata lookups sort by.
#[derive(Debug, Clone)]
pub(crate) struct TableFile {
    pub path: PathBuf,
    pub name: String,
    pub len: u64,
    pub modified: SystemTime,
    /// Numeric counter for plain `sstable_<N>.txt` files, used to break
    /// modification-time ties.
    pub counter: Option<u64>,
}

/// The set of SSTable files in one data directory, plus their in-memory
/// filters.
#[derive(Debug)]
pub struct SsTables {
    dir: PathBuf,
    filters: RwLock<HashMap<String, TableFilter>>,
}

impl SsTables {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filters: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes sorted entries to a new plain SSTable `sstable_<counter>.txt`
    /// and registers its filter. The file appears atomically or not at all.
    pub fn write_table(
        &self,
        entries: &[(String, Option<String>)],
        counter: u64,
    ) -> Result<PathBuf> {
        let mut filters = self.filters.write()?;

        fs::create_dir_all(&self.dir)?;

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let tmp_name = format!(
            "{TABLE_PREFIX}{counter}_{nonce}_{:016x}.tmp",
            rand::random::<u64>()
        );
        let tmp_path = self.dir.join(tmp_name);
        let final_name = format!("{TABLE_PREFIX}{counter}{PLAIN_SUFFIX}");
        let final_path = self.dir.join(&final_name);

        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for (key, value) in entries {
                writeln!(writer, "{}", crate::encoding::encode_line(key, value.as_deref()))?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        rename_with_retry(&tmp_path, &final_path)?;

        let mut filter = TableFilter::new();
        for (key, _) in entries {
            filter.add(key);
        }
        filters.insert(final_name, filter);

        Ok(final_path)
    }

    /// Looks up a key across plain SSTables, newest file first. Returns
    /// `Some(None)` for a tombstone and `None` when no file has the key.
    /// Files whose registered filter rejects the key are skipped, as are
    /// files that fail to read.
    pub fn lookup(&self, key: &str) -> Result<Option<Option<String>>> {
        let filters = self.filters.read()?;

        let mut files = self.plain_files()?;
        files.sort_by(|a, b| (b.modified, b.counter).cmp(&(a.modified, a.counter)));

        for file in files {
            if let Some(filter) = filters.get(&file.name) {
                if !filter.might_contain(key) {
                    continue;
                }
            }
            match scan_file(&file.path, key, false) {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "skipping unreadable sstable");
                }
            }
        }
        Ok(None)
    }

    /// Looks up a key across gzip-compressed SSTables, newest file first.
    pub fn lookup_compressed(&self, key: &str) -> Result<Option<Option<String>>> {
        let _filters = self.filters.read()?;

        let mut files = self.gz_files()?;
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        for file in files {
            match scan_file(&file.path, key, true) {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "skipping unreadable sstable");
                }
            }
        }
        Ok(None)
    }

    /// Returns true if any per-file filter may contain the key. A data file
    /// with no registered filter (its build failed) counts as a potential
    /// match: a false return must guarantee the key is on no file at all.
    pub fn might_contain(&self, key: &str) -> bool {
        let filters = match self.filters.read() {
            Ok(filters) => filters,
            Err(_) => return true,
        };
        let files = match self.data_files() {
            Ok(files) => files,
            Err(_) => return true,
        };
        if files.iter().any(|file| !filters.contains_key(&file.name)) {
            return true;
        }
        filters.values().any(|filter| filter.might_contain(key))
    }

    /// Rebuilds the per-file filter registry from every data file on disk
    /// and returns all keys read, so callers can re-seed coarser filters.
    /// Unreadable files are left unregistered; [`Self::might_contain`]
    /// treats them as potential matches and lookups still scan them.
    pub fn rebuild_filters(&self) -> Result<Vec<String>> {
        let mut filters = self.filters.write()?;
        filters.clear();

        let mut all_keys = Vec::new();
        for file in self.data_files()? {
            match read_keys(&file.path, file.name.ends_with(GZ_SUFFIX)) {
                Ok(keys) => {
                    let mut filter = TableFilter::new();
                    for key in &keys {
                        filter.add(key);
                    }
                    filters.insert(file.name, filter);
                    all_keys.extend(keys);
                }
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "failed to build sstable filter");
                }
            }
        }
        Ok(all_keys)
    }

    /// Next plain-table counter: one past the highest `sstable_<N>.txt` on
    /// disk, or zero for an empty directory.
    pub fn next_counter(&self) -> Result<u64> {
        let max = self
            .plain_files()?
            .into_iter()
            .filter_map(|f| f.counter)
            .max();
        Ok(max.map_or(0, |n| n + 1))
    }

    /// Total bytes and file count across all data files.
    pub fn disk_usage(&self) -> Result<(u64, usize)> {
        let files = self.data_files()?;
        let total = files.iter().map(|f| f.len).sum();
        Ok((total, files.len()))
    }

    /// Plain and compressed data files, unordered. The compaction temp file
    /// and flush temp files are never included.
    pub(crate) fn data_files(&self) -> Result<Vec<TableFile>> {
        self.list(|name| {
            name.ends_with(PLAIN_SUFFIX) || (name.ends_with(GZ_SUFFIX) && name != COMPACTED_TEMP)
        })
    }

    fn plain_files(&self) -> Result<Vec<TableFile>> {
        self.list(|name| name.ends_with(PLAIN_SUFFIX))
    }

    fn gz_files(&self) -> Result<Vec<TableFile>> {
        self.list(|name| name.ends_with(GZ_SUFFIX) && name != COMPACTED_TEMP)
    }

    fn list(&self, matches: impl Fn(&str) -> bool) -> Result<Vec<TableFile>> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(TABLE_PREFIX) || !matches(&name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Raced with a concurrent delete.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            files.push(TableFile {
                path: entry.path(),
                counter: parse_counter(&name),
                len: meta.len(),
                modified: meta.modified()?,
                name,
            });
        }
        Ok(files)
    }

    pub(crate) fn filters_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, TableFilter>>> {
        Ok(self.filters.write()?)
    }
}

/// Extracts `N` from `sstable_<N>.txt`.
fn parse_counter(name: &str) -> Option<u64> {
    name.strip_prefix(TABLE_PREFIX)?
        .strip_suffix(PLAIN_SUFFIX)?
        .parse()
        .ok()
}

/// Renames `tmp` to `dst`, retrying transient failures with a short backoff.
/// On final failure the temp file is removed.
fn rename_with_retry(tmp: &Path, dst: &Path) -> Result<()> {
    let mut attempt = 0;
    loop {
        match fs::rename(tmp, dst) {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= RENAME_ATTEMPTS {
                    let _ = fs::remove_file(tmp);
                    return Err(e.into());
                }
                tracing::warn!(attempt, error = %e, "sstable rename failed, retrying");
                std::thread::sleep(RENAME_BACKOFF);
            }
        }
    }
}

/// Scans one table file for the first line belonging to `key`. Matching is
/// by `<key>=` line prefix. Returns `Some(None)` for a tombstone.
fn scan_file(path: &Path, key: &str, compressed: bool) -> Result<Option<Option<String>>> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    for line in reader.lines() {
        let line = line?;
        let Some(rest) = line.strip_prefix(key) else {
            continue;
        };
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        if value == TOMBSTONE {
            return Ok(Some(None));
        }
        return Ok(Some(Some(value.to_string())));
    }
    Ok(None)
}

/// Reads every well-formed key from a table file.
fn read_keys(path: &Path, compressed: bool) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut keys = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some((key, _)) = crate::encoding::decode_line(&line) {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn entry(key: &str, value: Option<&str>) -> (String, Option<String>) {
        (key.to_string(), value.map(String::from))
    }

    #[test]
    fn test_write_table_creates_sorted_file() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        let entries = vec![
            entry("apple", Some("1")),
            entry("banana", None),
            entry("cherry", Some("3")),
        ];
        let path = tables.write_table(&entries, 0).expect("write failed");

        assert_eq!(path.file_name().unwrap(), "sstable_0.txt");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "apple=1\nbanana=__TOMBSTONE__\ncherry=3\n");

        // No temp files are left behind.
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_lookup_finds_value_and_tombstone() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables
            .write_table(&[entry("live", Some("value")), entry("dead", None)], 0)
            .unwrap();

        assert_eq!(tables.lookup("live").unwrap(), Some(Some("value".to_string())));
        assert_eq!(tables.lookup("dead").unwrap(), Some(None));
        assert_eq!(tables.lookup("missing").unwrap(), None);
    }

    #[test]
    fn test_lookup_prefers_newest_file() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables.write_table(&[entry("k", Some("old"))], 0).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        tables.write_table(&[entry("k", Some("new"))], 1).unwrap();

        assert_eq!(tables.lookup("k").unwrap(), Some(Some("new".to_string())));
    }

    #[test]
    fn test_lookup_key_containing_equals() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables
            .write_table(&[entry("key=with=equals", Some("value=with=equals"))], 0)
            .unwrap();

        assert_eq!(
            tables.lookup("key=with=equals").unwrap(),
            Some(Some("value=with=equals".to_string()))
        );
    }

    #[test]
    fn test_empty_value_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables.write_table(&[entry("k", Some(""))], 0).unwrap();
        assert_eq!(tables.lookup("k").unwrap(), Some(Some("".to_string())));
    }

    #[test]
    fn test_next_counter() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        assert_eq!(tables.next_counter().unwrap(), 0);

        tables.write_table(&[entry("a", Some("1"))], 0).unwrap();
        tables.write_table(&[entry("b", Some("2"))], 7).unwrap();

        assert_eq!(tables.next_counter().unwrap(), 8);
    }

    #[test]
    fn test_filter_skips_absent_keys() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables.write_table(&[entry("present", Some("v"))], 0).unwrap();

        assert!(tables.might_contain("present"));
        // A freshly written table registers its filter.
        assert_eq!(tables.lookup("present").unwrap(), Some(Some("v".to_string())));
    }

    #[test]
    fn test_rebuild_filters_returns_keys() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables
            .write_table(&[entry("a", Some("1")), entry("b", None)], 0)
            .unwrap();

        let fresh = SsTables::new(temp_dir.path());
        // Files without registered filters keep the gate open until the
        // rebuild has indexed them.
        assert!(fresh.might_contain("a"));
        assert!(fresh.might_contain("not_on_disk"));

        let mut keys = fresh.rebuild_filters().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(fresh.might_contain("a"));
        assert!(fresh.might_contain("b"));
    }

    #[test]
    fn test_unfilterable_file_keeps_gate_open() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        tables.write_table(&[entry("a", Some("1"))], 0).unwrap();
        // Invalid UTF-8 makes the filter build fail for this file.
        fs::write(
            temp_dir.path().join("sstable_1.txt"),
            [b'k', b'=', 0xff, 0xfe, b'\n'],
        )
        .unwrap();

        tables.rebuild_filters().unwrap();

        // The unregistered file must count as a potential match for any key,
        // or the membership gate would hide keys that are on disk.
        assert!(tables.might_contain("a"));
        assert!(tables.might_contain("key_only_in_unreadable_file"));
    }

    #[test]
    fn test_disk_usage() {
        let temp_dir = TempDir::new().unwrap();
        let tables = SsTables::new(temp_dir.path());

        assert_eq!(tables.disk_usage().unwrap(), (0, 0));

        tables.write_table(&[entry("a", Some("1"))], 0).unwrap();
        let (bytes, count) = tables.disk_usage().unwrap();
        assert_eq!(count, 1);
        assert_eq!(bytes, "a=1\n".len() as u64);
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("sstable_0.txt"), Some(0));
        assert_eq!(parse_counter("sstable_42.txt"), Some(42));
        assert_eq!(parse_counter("sstable_compacted.txt.gz"), None);
        assert_eq!(parse_counter("sstable_x.txt"), None);
    }
}
