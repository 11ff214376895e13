//! The storage engine: write path, read path, and background maintenance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐
//! │ Active Memtable │───►│ Immutable Queue  │
//! │   (SkipMap)     │    │ (oldest first)   │
//! └─────────────────┘    └──────────────────┘
//!           │                      │ flusher
//!           ▼                      ▼
//!      ┌─────────┐         ┌───────────────────┐
//!      │ wal.log │         │ sstable_<N>.txt   │
//!      └─────────┘         └───────────────────┘
//!                                  │ compaction
//!                                  ▼
//!                       ┌─────────────────────────┐
//!                       │ sstable_compacted.txt.gz│
//!                       └─────────────────────────┘
//! ```
//!
//! # Write path
//!
//! 1. The record is appended to the WAL and fsynced.
//! 2. It is inserted into the active memtable under the write lock.
//! 3. Past the size threshold the memtable rotates into the immutable
//!    queue and the background flusher is woken.
//! 4. The flusher drains the queue into plain SSTables; once the queue is
//!    empty the WAL is truncated and the compaction checks run.
//!
//! # Read path
//!
//! Active memtable, then immutable memtables newest first, then plain
//! SSTables newest first (gated by per-file filters), then compressed
//! SSTables. A tombstone in any layer masks everything older.

pub mod flush;
pub mod metrics;
pub mod recovery;
pub mod state;
pub mod store;

pub use metrics::{CompressionStats, StoreStats};
pub use state::LsmState;
pub use store::LsmStore;
