//! In-memory write buffer backed by a concurrent skip list.
//!
//! The memtable maps keys to optional values, where `None` marks a
//! tombstone. It keeps a running byte count of `key.len() + value.len()`
//! (tombstones count as zero-length values) so the engine can decide when to
//! rotate it out for flushing.
//!
//! Reads are lock-free through the skip list. Writers must be serialized
//! externally (the engine's write lock does this); the size accounting reads
//! the previous entry before replacing it and is not atomic on its own.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errinput;
use crate::error::Result;

/// In-memory sorted table of recent writes.
#[derive(Debug)]
pub struct Memtable {
    entries: SkipMap<String, Option<String>>,
    size: AtomicUsize,
}

impl Memtable {
    /// Creates a new empty memtable.
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Inserts or updates a key. A `None` value stores a tombstone. Updating
    /// an existing key subtracts its old byte contribution before adding the
    /// new one.
    pub fn put(&self, key: String, value: Option<String>) -> Result<()> {
        if key.is_empty() {
            return errinput!("key must not be empty");
        }

        if let Some(entry) = self.entries.get(&key) {
            let old = entry.key().len() + entry.value().as_ref().map_or(0, |v| v.len());
            self.size.fetch_sub(old, Ordering::SeqCst);
        }

        let added = key.len() + value.as_ref().map_or(0, |v| v.len());
        self.entries.insert(key, value);
        self.size.fetch_add(added, Ordering::SeqCst);

        Ok(())
    }

    /// Looks up a key. Returns `None` if the key is not in this memtable,
    /// `Some(None)` for a tombstone, and `Some(Some(value))` for a live
    /// value.
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Returns a snapshot of all entries in key order.
    pub fn dump(&self) -> Vec<(String, Option<String>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Total byte contribution of all present entries.
    pub fn size_in_bytes(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries and resets the byte count.
    pub fn clear(&self) {
        while self.entries.pop_front().is_some() {}
        self.size.store(0, Ordering::SeqCst);
    }
}
