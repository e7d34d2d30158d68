//! SQLite-backed recipe cache.
//!
//! Three relations: `pair` (combination results, keyed by the canonical
//! pair), `item` (every distinct result ever seen, with its icon and
//! novelty flag), and `tokenize` (token counts per name). `pair` rows are
//! always stored with `first <= second`.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
begin;
    create table if not exists pair(
        first text not null,
        second text not null,
        result text null,
        created_at integer null,
        primary key (first, second)
    );
    create table if not exists item(
        name text primary key not null,
        emoji text not null,
        is_new integer not null,
        created_at integer null
    );
    create table if not exists tokenize(
        name text primary key not null,
        count integer not null
    );
commit;
";

/// Persistent cache shared by the oracle client and the tokenizer layer.
///
/// All access goes through an internal mutex; within one process the
/// pipeline is strictly sequential, so the lock is never contended.
pub struct RecipeCache {
    conn: Mutex<Connection>,
}

impl RecipeCache {
    /// Open (and migrate) the cache at the given path.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Recipe cache opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory cache (tests, throwaway runs).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a stored combination for a canonical pair.
    ///
    /// Outer `None` means the pair has never been queried; inner `None`
    /// means it was queried and the oracle reported no combination.
    pub fn pair_result(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Option<Option<String>>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select result from pair where first = ?1 and second = ?2",
            params![first, second],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
    }

    /// Store a combination result for a canonical pair.
    ///
    /// Last write wins; a mismatch against a previously stored result is
    /// logged and overwritten.
    pub fn store_pair(
        &self,
        first: &str,
        second: &str,
        result: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        let existing = self.pair_result(first, second)?;
        if let Some(old) = &existing {
            if old.as_deref() != result {
                tracing::info!(
                    first,
                    second,
                    old = old.as_deref().unwrap_or(""),
                    new = result.unwrap_or(""),
                    "Oracle answer changed for cached pair, overwriting"
                );
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "insert or replace into pair (first, second, result, created_at)
             values (?1, ?2, ?3, ?4)",
            params![first, second, result, now_epoch_secs()],
        )?;
        Ok(())
    }

    /// Record a discovered item. Returns true if the item was new to the
    /// cache (first discovery in this database).
    pub fn record_item(
        &self,
        name: &str,
        emoji: &str,
        is_new: bool,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "insert or ignore into item (name, emoji, is_new, created_at)
             values (?1, ?2, ?3, ?4)",
            params![name, emoji, is_new, now_epoch_secs()],
        )?;
        Ok(inserted != 0)
    }

    /// Cached token count for a name, if one has been stored.
    pub fn token_count(&self, name: &str) -> Result<Option<usize>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "select count from tokenize where name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|opt| opt.map(|n| n as usize))
    }

    /// Store a token count for a name.
    pub fn store_token_count(&self, name: &str, count: usize) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "insert or replace into tokenize (name, count) values (?1, ?2)",
            params![name, count as i64],
        )?;
        Ok(())
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pair_is_distinct_from_no_combination() {
        let cache = RecipeCache::open_in_memory().unwrap();
        assert_eq!(cache.pair_result("Fire", "Water").unwrap(), None);

        cache.store_pair("Fire", "Water", None).unwrap();
        assert_eq!(cache.pair_result("Fire", "Water").unwrap(), Some(None));
    }

    #[test]
    fn test_store_and_lookup_pair() {
        let cache = RecipeCache::open_in_memory().unwrap();
        cache.store_pair("Fire", "Water", Some("Steam")).unwrap();
        assert_eq!(
            cache.pair_result("Fire", "Water").unwrap(),
            Some(Some("Steam".to_string()))
        );
    }

    #[test]
    fn test_last_write_wins_on_mismatch() {
        let cache = RecipeCache::open_in_memory().unwrap();
        cache.store_pair("Fire", "Water", Some("Steam")).unwrap();
        cache.store_pair("Fire", "Water", Some("Mist")).unwrap();
        assert_eq!(
            cache.pair_result("Fire", "Water").unwrap(),
            Some(Some("Mist".to_string()))
        );
    }

    #[test]
    fn test_record_item_reports_first_discovery() {
        let cache = RecipeCache::open_in_memory().unwrap();
        assert!(cache.record_item("Steam", "💨", false).unwrap());
        // Second insert is ignored
        assert!(!cache.record_item("Steam", "💨", false).unwrap());
    }

    #[test]
    fn test_token_counts_round_trip() {
        let cache = RecipeCache::open_in_memory().unwrap();
        assert_eq!(cache.token_count("Water").unwrap(), None);
        cache.store_token_count("Water", 1).unwrap();
        assert_eq!(cache.token_count("Water").unwrap(), Some(1));
    }

    #[test]
    fn test_cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipes.db");
        {
            let cache = RecipeCache::open(&path).unwrap();
            cache.store_pair("Fire", "Water", Some("Steam")).unwrap();
        }
        let cache = RecipeCache::open(&path).unwrap();
        assert_eq!(
            cache.pair_result("Fire", "Water").unwrap(),
            Some(Some("Steam".to_string()))
        );
    }
}
