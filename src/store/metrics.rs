use std::fmt::Display;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::store::state::LsmState;

/// Point-in-time snapshot of store health.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub active_memtable_bytes: usize,
    pub immutable_memtable_count: usize,
    pub total_sstable_bytes: u64,
    pub sstable_file_count: usize,
    pub sstable_disk_limit: u64,
    pub memtable_limit_bytes: usize,
}

impl StoreStats {
    pub fn memtable_usage_percent(&self) -> f64 {
        self.active_memtable_bytes as f64 / self.memtable_limit_bytes as f64 * 100.0
    }

    pub fn disk_usage_percent(&self) -> f64 {
        self.total_sstable_bytes as f64 / self.sstable_disk_limit as f64 * 100.0
    }
}

impl Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "StoreStats{{active_memtable={}/{} bytes ({:.1}%), immutables={}, \
             sstables={} files, {:.2} MB/{:.2} GB ({:.2}% used)}}",
            self.active_memtable_bytes,
            self.memtable_limit_bytes,
            self.memtable_usage_percent(),
            self.immutable_memtable_count,
            self.sstable_file_count,
            self.total_sstable_bytes as f64 / (1024.0 * 1024.0),
            self.sstable_disk_limit as f64 / (1024.0 * 1024.0 * 1024.0),
            self.disk_usage_percent(),
        )
    }
}

/// Gzip coverage of the table directory.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionStats {
    pub total_files: usize,
    pub compressed_files: usize,
    pub total_bytes: u64,
    pub compressed_bytes: u64,
}

impl CompressionStats {
    pub fn compression_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.compressed_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

impl Display for CompressionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "CompressionStats{{files={}/{} compressed, size={:.1} KB/{:.1} KB ({:.1}% compressed)}}",
            self.compressed_files,
            self.total_files,
            self.compressed_bytes as f64 / 1024.0,
            self.total_bytes as f64 / 1024.0,
            self.compression_percent(),
        )
    }
}

/// Collects a [`StoreStats`] snapshot from live state.
pub(crate) fn collect(state: &LsmState, config: &Config) -> Result<StoreStats> {
    let active_memtable_bytes = state.active.read().unwrap().size_in_bytes();
    let immutable_memtable_count = state.immutables.read().unwrap().len();
    let (total_sstable_bytes, sstable_file_count) = state.tables.disk_usage()?;

    Ok(StoreStats {
        active_memtable_bytes,
        immutable_memtable_count,
        total_sstable_bytes,
        sstable_file_count,
        sstable_disk_limit: config.sstable_disk_limit,
        memtable_limit_bytes: config.memtable_limit_bytes,
    })
}

/// Collects a [`CompressionStats`] snapshot from the table directory.
pub(crate) fn collect_compression(state: &LsmState) -> Result<CompressionStats> {
    let mut stats = CompressionStats {
        total_files: 0,
        compressed_files: 0,
        total_bytes: 0,
        compressed_bytes: 0,
    };
    for file in state.tables.data_files()? {
        stats.total_files += 1;
        stats.total_bytes += file.len;
        if file.name.ends_with(".gz") {
            stats.compressed_files += 1;
            stats.compressed_bytes += file.len;
        }
    }
    Ok(stats)
}
