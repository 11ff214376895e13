use std::path::PathBuf;

/// Configuration for the store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database
    pub dir: PathBuf,

    /// Size at which the active memtable is rotated and queued for flush
    /// (default: 4KB)
    pub memtable_limit_bytes: usize,

    /// Soft limit on total SSTable bytes before compaction kicks in
    /// (default: 1GB)
    pub sstable_disk_limit: u64,

    /// Soft limit on the number of SSTable files before compaction kicks in
    /// (default: 10)
    pub max_sstable_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            memtable_limit_bytes: 4 * 1024,                // 4KB
            sstable_disk_limit: 1024 * 1024 * 1024,        // 1GB
            max_sstable_files: 10,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable rotation threshold
    pub fn memtable_limit_bytes(mut self, bytes: usize) -> Self {
        self.memtable_limit_bytes = bytes;
        self
    }

    /// Set the soft SSTable disk limit
    pub fn sstable_disk_limit(mut self, bytes: u64) -> Self {
        self.sstable_disk_limit = bytes;
        self
    }

    /// Set the soft SSTable file-count limit
    pub fn max_sstable_files(mut self, count: usize) -> Self {
        self.max_sstable_files = count;
        self
    }
}
