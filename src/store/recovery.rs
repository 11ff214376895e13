use std::fs;

use crate::config::Config;
use crate::error::Result;
use crate::filter::BloomFilter;
use crate::memtable::Memtable;
use crate::sstable::SsTables;
use crate::store::state::LsmState;
use crate::wal::Wal;

const WAL_FILE: &str = "wal.log";

/// Capacity hint for the engine-wide key filter.
const KEYS_FILTER_CAPACITY: usize = 10_000;
const KEYS_FILTER_FP_RATE: f64 = 0.01;

/// Builds store state from a data directory: scans existing SSTables for the
/// next counter, replays the WAL into a fresh memtable, and rebuilds the
/// per-file and engine-wide filters.
pub(crate) fn recover_state(config: &Config) -> Result<LsmState> {
    fs::create_dir_all(&config.dir)?;

    let tables = SsTables::new(&config.dir);
    let next_table_id = tables.next_counter()?;

    let wal = Wal::open(config.dir.join(WAL_FILE))?;
    let memtable = Memtable::new();
    let mut replayed = 0usize;
    for entry in wal.replay()? {
        let (key, value) = entry?;
        memtable.put(key, value)?;
        replayed += 1;
    }

    let mut keys_filter = BloomFilter::new(KEYS_FILTER_CAPACITY, KEYS_FILTER_FP_RATE)?;
    for (key, _) in memtable.dump() {
        keys_filter.add(&key);
    }
    for key in tables.rebuild_filters()? {
        keys_filter.add(&key);
    }

    tracing::info!(
        replayed,
        next_table_id,
        dir = %config.dir.display(),
        "recovered store state"
    );

    Ok(LsmState::new(memtable, wal, tables, keys_filter, next_table_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_recover_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());

        let state = recover_state(&config)?;

        assert!(state.active.read().unwrap().is_empty());
        assert!(state.immutables.read().unwrap().is_empty());
        assert_eq!(state.next_table_id(), 0);
        assert!(temp_dir.path().join(WAL_FILE).exists());

        Ok(())
    }

    #[test]
    fn test_recover_replays_wal() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());

        {
            let wal = Wal::open(temp_dir.path().join(WAL_FILE))?;
            wal.append("k1", Some("v1"))?;
            wal.append("k2", None)?;
            wal.close()?;
        }

        let state = recover_state(&config)?;
        let active = state.active.read().unwrap();
        assert_eq!(active.get("k1"), Some(Some("v1".into())));
        assert_eq!(active.get("k2"), Some(None));
        assert!(state.keys_filter.lock().unwrap().might_contain("k1"));

        Ok(())
    }

    #[test]
    fn test_recover_resumes_table_counter() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path());

        let tables = SsTables::new(temp_dir.path());
        tables.write_table(&[("k".to_string(), Some("v".to_string()))], 4)?;

        let state = recover_state(&config)?;
        assert_eq!(state.next_table_id(), 5);
        assert!(state.tables.might_contain("k"));
        assert!(state.keys_filter.lock().unwrap().might_contain("k"));

        Ok(())
    }
}
