use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::encoding::TOMBSTONE;
use crate::errinput;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::store::{flush, metrics, recovery};
use crate::store::metrics::{CompressionStats, StoreStats};
use crate::store::state::LsmState;

/// How often `wait_for_flush_completion` re-checks the flusher state.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Embedded LSM key-value store over a single data directory.
///
/// The directory is owned by one store instance; opening it twice in the
/// same process or from two processes is undefined. Background flushing
/// uses `tokio::spawn`, so the store must live inside a tokio runtime.
pub struct LsmStore {
    config: Config,
    state: Arc<LsmState>,
}

impl LsmStore {
    /// Opens a store with default configuration, recovering any existing
    /// state in the directory.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with_config(Config::new(dir))
    }

    /// Opens a store with custom configuration.
    pub fn open_with_config(config: Config) -> Result<Self> {
        let state = Arc::new(recovery::recover_state(&config)?);
        Ok(Self { config, state })
    }

    /// Inserts or updates a key. The write is durable in the WAL before this
    /// returns. Crossing the memtable size threshold rotates the memtable
    /// and wakes the background flusher.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, Some(value))
    }

    /// Deletes a key by writing a tombstone. Durable like [`put`].
    ///
    /// [`put`]: LsmStore::put
    pub fn delete(&self, key: &str) -> Result<()> {
        self.write(key, None)
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<()> {
        if key.is_empty() {
            return errinput!("key must not be empty");
        }
        if value == Some(TOMBSTONE) {
            return errinput!("value {TOMBSTONE:?} is reserved for tombstones");
        }

        let _guard = self.state.write_lock.lock().unwrap();

        self.state.wal.append(key, value)?;

        let rotate = {
            let active = self.state.active.read().unwrap();
            active.put(key.to_string(), value.map(String::from))?;
            active.size_in_bytes() >= self.config.memtable_limit_bytes
        };
        self.state.keys_filter.lock().unwrap().add(key);

        if rotate {
            self.rotate_active(true);
        }
        Ok(())
    }

    /// Returns the most recent live value for a key, or `None` for a key
    /// that is missing or tombstoned. Layers are consulted newest first:
    /// active memtable, immutable memtables, then SSTables (plain before
    /// compressed) gated by the per-file filters.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.state.active.read().unwrap().get(key) {
            return Ok(value);
        }

        {
            let immutables = self.state.immutables.read().unwrap();
            for memtable in immutables.iter().rev() {
                if let Some(value) = memtable.get(key) {
                    return Ok(value);
                }
            }
        }

        if self.state.tables.might_contain(key) {
            if let Some(value) = self.state.tables.lookup(key)? {
                return Ok(value);
            }
            if let Some(value) = self.state.tables.lookup_compressed(key)? {
                return Ok(value);
            }
        }

        Ok(None)
    }

    /// Returns true if any SSTable's filter may contain the key. A false
    /// return guarantees no SSTable on disk has an entry for the key.
    pub fn might_contain_in_sstables(&self, key: &str) -> bool {
        self.state.tables.might_contain(key)
    }

    /// Cheap membership hint over every key the store has seen, including
    /// unflushed and deleted ones. False positives possible; `get` is the
    /// source of truth.
    pub fn might_contain(&self, key: &str) -> bool {
        self.state.keys_filter.lock().unwrap().might_contain(key)
    }

    /// Synchronously drains all buffered writes to SSTables. A no-op when
    /// the active memtable is empty. Once the queue is empty the WAL is
    /// truncated, then the compaction checks run.
    pub async fn flush(&self) -> Result<()> {
        {
            let _guard = self.state.write_lock.lock().unwrap();
            if self.state.active.read().unwrap().is_empty() {
                return Ok(());
            }
            self.rotate_active(false);
        }
        flush::drain_immutables(&self.state, &self.config)
    }

    /// Compacts all SSTables into one under the compaction lock, waiting for
    /// a running compaction to finish first, then rebuilds every filter from
    /// disk.
    pub async fn force_compaction(&self) -> Result<()> {
        let _guard = self.state.compaction_lock.lock().unwrap();
        tracing::info!("forcing compaction");

        let result = self
            .state
            .tables
            .compact_by_size(0)
            .and_then(|()| self.state.tables.compact_by_file_count(0));

        // Filters are rebuilt even when compaction failed partway, so the
        // registry matches whatever is on disk now.
        let rebuilt = self.rebuild_filters_from_disk();
        result?;
        rebuilt
    }

    /// Blocks until no flusher is running and the immutable queue is empty.
    pub async fn wait_for_flush_completion(&self) {
        while !self.state.flush_idle() {
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    /// Point-in-time store health snapshot.
    pub fn stats(&self) -> Result<StoreStats> {
        metrics::collect(&self.state, &self.config)
    }

    /// Gzip coverage of the table directory.
    pub fn compression_stats(&self) -> Result<CompressionStats> {
        metrics::collect_compression(&self.state)
    }

    /// Flushes and closes the WAL.
    pub fn close(&self) -> Result<()> {
        self.state.wal.close()
    }

    /// Swaps in a fresh active memtable and queues the old one for flushing.
    /// Callers hold the write lock.
    fn rotate_active(&self, wake_flusher: bool) {
        let old = {
            let mut active = self.state.active.write().unwrap();
            std::mem::replace(&mut *active, Arc::new(Memtable::new()))
        };
        self.state.immutables.write().unwrap().push_back(old);
        if wake_flusher {
            flush::trigger_background_flush(&self.state, &self.config);
        }
    }

    /// Rebuilds the per-file filters from disk and re-seeds the engine-wide
    /// key filter from every layer.
    fn rebuild_filters_from_disk(&self) -> Result<()> {
        let disk_keys = self.state.tables.rebuild_filters()?;

        let mut filter = self.state.keys_filter.lock().unwrap();
        filter.clear();
        for key in disk_keys {
            filter.add(&key);
        }
        for (key, _) in self.state.active.read().unwrap().dump() {
            filter.add(&key);
        }
        for memtable in self.state.immutables.read().unwrap().iter() {
            for (key, _) in memtable.dump() {
                filter.add(&key);
            }
        }
        Ok(())
    }
}

impl Drop for LsmStore {
    fn drop(&mut self) {
        if let Err(e) = self.state.wal.close() {
            tracing::warn!(error = %e, "failed to close wal");
        }
    }
}
