//! SSTable compaction.
//!
//! Compaction merges every data file in the directory into a single
//! gzip-compressed table. Files are read oldest first so later writes
//! overwrite earlier ones in the merge map, and keys whose newest entry is a
//! tombstone are dropped entirely; this is safe because compaction always
//! consumes the full on-disk file set, so no older live value can survive in
//! a layer it did not read.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{SsTables, TableFile, COMPACTED_FILE, COMPACTED_TEMP};
use crate::encoding::TOMBSTONE;
use crate::error::Result;
use crate::filter::TableFilter;

impl SsTables {
    /// Compacts the directory if its data files exceed `size_limit_bytes` in
    /// total. A limit of zero compacts unconditionally.
    pub fn compact_by_size(&self, size_limit_bytes: u64) -> Result<()> {
        let mut filters = self.filters_mut()?;

        let mut files = self.data_files()?;
        if files.is_empty() {
            return Ok(());
        }
        let total: u64 = files.iter().map(|f| f.len).sum();
        if size_limit_bytes > 0 && total <= size_limit_bytes {
            return Ok(());
        }

        files.sort_by_key(|f| f.modified);
        tracing::info!(files = files.len(), total_bytes = total, "compacting by size");
        self.perform_compaction(&files, &mut filters)
    }

    /// Compacts the directory if it holds more than `max_files` data files.
    /// A limit of zero compacts unconditionally.
    pub fn compact_by_file_count(&self, max_files: usize) -> Result<()> {
        let mut filters = self.filters_mut()?;

        let mut files = self.data_files()?;
        if files.len() <= max_files {
            return Ok(());
        }

        files.sort_by_key(|f| f.modified);
        tracing::info!(files = files.len(), max_files, "compacting by file count");
        self.perform_compaction(&files, &mut filters)
    }

    /// Merges `files` (oldest first) into `sstable_compacted.txt.gz`,
    /// dropping tombstoned keys, then deletes the inputs and refreshes the
    /// filter registry. Callers hold the registry write lock.
    fn perform_compaction(
        &self,
        files: &[TableFile],
        filters: &mut std::collections::HashMap<String, TableFilter>,
    ) -> Result<()> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for file in files {
            if let Err(e) = merge_file(&file.path, &mut merged) {
                tracing::warn!(file = %file.name, error = %e, "skipping compaction input");
            }
        }

        let temp_path = self.dir().join(COMPACTED_TEMP);
        let final_path = self.dir().join(COMPACTED_FILE);

        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
            for (key, value) in &merged {
                if value.as_str() == TOMBSTONE {
                    continue;
                }
                writeln!(writer, "{key}={value}")?;
            }
            let encoder = writer.into_inner().map_err(|e| e.into_error())?;
            let file = encoder.finish()?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            // Some filesystems refuse the atomic rename; fall back to a copy.
            tracing::warn!(error = %e, "atomic rename of compacted table failed, copying");
            if let Err(copy_err) = fs::copy(&temp_path, &final_path) {
                let _ = fs::remove_file(&temp_path);
                return Err(copy_err.into());
            }
            fs::remove_file(&temp_path)?;
        }

        let mut dropped = 0usize;
        for file in files {
            if file.path == final_path || !file.path.exists() {
                continue;
            }
            if let Err(e) = fs::remove_file(&file.path) {
                tracing::warn!(file = %file.name, error = %e, "could not delete compacted input");
            } else {
                dropped += 1;
            }
            filters.remove(&file.name);
        }

        let mut filter = TableFilter::new();
        for (key, value) in &merged {
            if value.as_str() != TOMBSTONE {
                filter.add(key);
            }
        }
        filters.insert(COMPACTED_FILE.to_string(), filter);

        tracing::info!(
            inputs = files.len(),
            deleted = dropped,
            entries = merged.len(),
            "compaction complete"
        );
        Ok(())
    }
}

/// Folds one table file into the merge map. Values are kept raw, tombstone
/// marker included, so recency decides survival before tombstones are
/// elided on write-out. Malformed lines are skipped.
fn merge_file(path: &Path, merged: &mut BTreeMap<String, String>) -> Result<()> {
    if !path.exists() {
        // Input vanished mid-run.
        return Ok(());
    }
    let file = File::open(path)?;
    let compressed = path.extension().is_some_and(|ext| ext == "gz");
    let reader: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    for line in reader.lines() {
        let line = line?;
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        merged.insert(key.to_string(), value.to_string());
    }
    Ok(())
}
