use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};

use crate::filter::BloomFilter;
use crate::memtable::Memtable;
use crate::sstable::SsTables;
use crate::wal::Wal;

/// All mutable state for the store with fine-grained locking.
pub struct LsmState {
    // Write path
    pub active: RwLock<Arc<Memtable>>,
    pub immutables: RwLock<VecDeque<Arc<Memtable>>>,
    pub wal: Wal,

    // Read path
    pub tables: SsTables,
    pub keys_filter: Mutex<BloomFilter>,

    // Counters and coordination
    pub next_table_id: AtomicU64,
    pub flusher_running: AtomicBool,
    pub flushing: AtomicUsize,

    /// Serializes memtable mutation and rotation across `put`/`delete`/
    /// `flush` callers.
    pub write_lock: Mutex<()>,
    /// At most one compaction at a time; contended attempts bail out.
    pub compaction_lock: Mutex<()>,
}

impl LsmState {
    pub fn new(
        active: Memtable,
        wal: Wal,
        tables: SsTables,
        keys_filter: BloomFilter,
        next_table_id: u64,
    ) -> Self {
        Self {
            active: RwLock::new(Arc::new(active)),
            immutables: RwLock::new(VecDeque::new()),
            wal,
            tables,
            keys_filter: Mutex::new(keys_filter),
            next_table_id: AtomicU64::new(next_table_id),
            flusher_running: AtomicBool::new(false),
            flushing: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
        }
    }

    /// Allocates the next SSTable counter.
    pub fn next_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Claims the singleton flusher slot. Returns false if a flusher is
    /// already running.
    pub fn try_start_flusher(&self) -> bool {
        self.flusher_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish_flusher(&self) {
        self.flusher_running.store(false, Ordering::SeqCst);
    }

    /// True when no flusher is running, no table write is in flight, and the
    /// immutable queue is empty.
    pub fn flush_idle(&self) -> bool {
        !self.flusher_running.load(Ordering::SeqCst)
            && self.flushing.load(Ordering::SeqCst) == 0
            && self.immutables.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tmpfs::TempDir;

    fn create_state(temp_dir: &TempDir) -> LsmState {
        let config = Config::new(temp_dir.path());
        crate::store::recovery::recover_state(&config).expect("Failed to recover state")
    }

    #[test]
    fn test_table_id_allocation_is_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        let state = create_state(&temp_dir);

        assert_eq!(state.next_table_id(), 0);
        assert_eq!(state.next_table_id(), 1);
        assert_eq!(state.next_table_id(), 2);
    }

    #[test]
    fn test_flusher_slot_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let state = create_state(&temp_dir);

        assert!(state.try_start_flusher());
        assert!(!state.try_start_flusher());

        state.finish_flusher();
        assert!(state.try_start_flusher());
    }

    #[test]
    fn test_flush_idle() {
        let temp_dir = TempDir::new().unwrap();
        let state = create_state(&temp_dir);

        assert!(state.flush_idle());

        state
            .immutables
            .write()
            .unwrap()
            .push_back(Arc::new(Memtable::new()));
        assert!(!state.flush_idle());

        state.immutables.write().unwrap().pop_front();
        assert!(state.flush_idle());

        assert!(state.try_start_flusher());
        assert!(!state.flush_idle());
    }
}
