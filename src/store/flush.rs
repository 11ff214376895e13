use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::store::state::LsmState;

/// Spawns the singleton background flusher if one is not already running.
/// The flusher drains the immutable queue, truncates the WAL once it is
/// empty, runs the compaction checks, and re-arms itself if the queue
/// refilled while it was shutting down.
pub(crate) fn trigger_background_flush(state: &Arc<LsmState>, config: &Config) {
    if !state.try_start_flusher() {
        return;
    }

    let state = Arc::clone(state);
    let config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = drain_immutables(&state, &config) {
            tracing::error!(error = %e, "background flush failed");
        }
        state.finish_flusher();
        if !state.immutables.read().unwrap().is_empty() {
            trigger_background_flush(&state, &config);
        }
    });
}

/// Drains the immutable queue head-to-tail, writing one SSTable per
/// memtable. When the queue empties the WAL is truncated (truncation
/// failures are logged, not surfaced), then the size and file-count
/// compaction checks run. A failed table write re-queues the memtable at
/// the head and aborts the drain.
pub(crate) fn drain_immutables(state: &LsmState, config: &Config) -> Result<()> {
    loop {
        let memtable = {
            let mut queue = state.immutables.write().unwrap();
            match queue.pop_front() {
                Some(memtable) => {
                    // Count the in-flight write while still holding the
                    // queue lock, so the truncation check below cannot miss
                    // a popped-but-unwritten memtable.
                    state
                        .flushing
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    memtable
                }
                None => break,
            }
        };

        let table_id = state.next_table_id();
        let result = write_memtable(state, &memtable, table_id);

        if let Err(e) = result {
            tracing::error!(table_id, error = %e, "failed to write sstable, halting flush");
            // Re-queue before releasing the in-flight count so no
            // concurrent drain can truncate the WAL in between.
            let mut queue = state.immutables.write().unwrap();
            queue.push_front(memtable);
            state
                .flushing
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(e);
        }
        state
            .flushing
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    {
        let queue = state.immutables.write().unwrap();
        let in_flight = state.flushing.load(std::sync::atomic::Ordering::SeqCst);
        if queue.is_empty() && in_flight == 0 {
            if let Err(e) = state.wal.clear() {
                tracing::warn!(error = %e, "failed to truncate wal after flush");
            }
        }
    }

    match maybe_compact(state, config) {
        Ok(()) | Err(Error::Busy) => Ok(()),
        Err(e) => Err(e),
    }
}

fn write_memtable(state: &LsmState, memtable: &Memtable, table_id: u64) -> Result<()> {
    tracing::debug!(table_id, entries = memtable.len(), "flushing memtable to sstable");
    state.tables.write_table(&memtable.dump(), table_id)?;
    Ok(())
}

/// Runs the size and file-count compaction checks under the compaction
/// lock. Returns [`Error::Busy`] without waiting if a compaction is already
/// running.
pub(crate) fn maybe_compact(state: &LsmState, config: &Config) -> Result<()> {
    let Ok(_guard) = state.compaction_lock.try_lock() else {
        return Err(Error::Busy);
    };
    state.tables.compact_by_size(config.sstable_disk_limit)?;
    state.tables.compact_by_file_count(config.max_sstable_files)?;
    Ok(())
}
