//! EmberDB is an embedded, file-backed key-value store organized as a
//! log-structured merge tree. Writes land in a WAL and an in-memory
//! memtable; full memtables are flushed to immutable sorted table files,
//! which compaction periodically merges into a single compressed table.
//!
//! ```no_run
//! use emberdb::LsmStore;
//!
//! #[tokio::main]
//! async fn main() -> emberdb::Result<()> {
//!     let store = LsmStore::open("./data")?;
//!     store.put("name", "Likitha")?;
//!     assert_eq!(store.get("name")?.as_deref(), Some("Likitha"));
//!     store.delete("name")?;
//!     store.flush().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod memtable;
pub mod sstable;
pub mod store;
pub mod wal;

#[cfg(test)]
pub mod tmpfs;

pub use config::Config;
pub use encoding::TOMBSTONE;
pub use error::{Error, Result};
pub use store::{CompressionStats, LsmStore, StoreStats};
