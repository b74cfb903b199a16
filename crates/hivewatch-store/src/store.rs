//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use hivewatch_types::Readings;

use crate::error::{Error, Result};
use crate::models::{NewRecord, SensorRecord, StoreStats};
use crate::queries::{RECORD_COLUMNS, RecordQuery};
use crate::schema;

/// SQLite-backed durable buffer of sensor records.
///
/// The store is the single source of truth for delivery state. Records are
/// appended unsynced and immutable, except for the `synced` flag which only
/// ever moves from false to true.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL keeps the API's reads from blocking the collector's writes
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Record operations
impl Store {
    /// Append a record, unsynced. Returns its id.
    ///
    /// The record must carry at least one value, and every present channel
    /// must be a finite number; otherwise nothing is written and
    /// [`Error::InvalidRecord`] is returned.
    pub fn insert(&self, record: &NewRecord) -> Result<i64> {
        if !record.has_data() {
            return Err(Error::InvalidRecord(
                "record has no sensor values".to_string(),
            ));
        }
        if let Some((channel, value)) = record.readings.first_non_finite() {
            return Err(Error::InvalidRecord(format!(
                "{channel} is not a finite number ({value})"
            )));
        }

        let r = &record.readings;
        self.conn.execute(
            "INSERT INTO records (captured_at, gas_level, sound_level, weight,
             temp_inside, temp_outside, humidity_inside, humidity_outside, pressure,
             image_path, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
            rusqlite::params![
                record.captured_at.unix_timestamp(),
                r.gas_level,
                r.sound_level,
                r.weight,
                r.temp_inside,
                r.temp_outside,
                r.humidity_inside,
                r.humidity_outside,
                r.pressure,
                record.image_path,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Inserted record {}", id);
        Ok(id)
    }

    /// Get a record by id.
    pub fn get(&self, id: i64) -> Result<Option<SensorRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?");
        let record = self
            .conn
            .query_row(&sql, [id], parse_record)
            .optional()?;
        Ok(record)
    }

    /// All unsynced records, oldest (insertion order) first.
    pub fn fetch_unsynced(&self) -> Result<Vec<SensorRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE synced = 0 ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], parse_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Mark a record as delivered.
    ///
    /// Idempotent: returns `true` only when this call flipped the flag.
    /// Already-synced and unknown ids are a no-op returning `false`.
    pub fn mark_synced(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE records SET synced = 1, synced_at = ?2 WHERE id = ?1 AND synced = 0",
            rusqlite::params![id, OffsetDateTime::now_utc().unix_timestamp()],
        )?;
        Ok(changed > 0)
    }

    /// Delete every record (synced or not) captured before `now - window`.
    ///
    /// Returns the number of deleted records. A window reaching past the
    /// representable date range deletes nothing.
    pub fn prune_older_than(&self, window: std::time::Duration) -> Result<usize> {
        let cutoff = time::Duration::try_from(window)
            .ok()
            .and_then(|window| OffsetDateTime::now_utc().checked_sub(window));
        match cutoff {
            Some(cutoff) => self.prune_before(cutoff),
            None => {
                debug!("Retention window {:?} predates any record, nothing to prune", window);
                Ok(0)
            }
        }
    }

    /// Delete every record (synced or not) captured before `cutoff`.
    pub fn prune_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM records WHERE captured_at < ?",
            [cutoff.unix_timestamp()],
        )?;
        if deleted > 0 {
            info!("Pruned {} records captured before {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// The most recent `limit` records, newest first.
    pub fn fetch_latest(&self, limit: u32) -> Result<Vec<SensorRecord>> {
        self.query(&RecordQuery::new().limit(limit))
    }

    /// Query records with filters.
    pub fn query(&self, query: &RecordQuery) -> Result<Vec<SensorRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_ref.as_slice(), parse_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Count records, optionally filtered by sync state.
    pub fn count(&self, synced: Option<bool>) -> Result<u64> {
        let count: i64 = match synced {
            Some(flag) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE synced = ?",
                [flag],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Counts and capture-time span.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total, synced, oldest, newest): (i64, Option<i64>, Option<i64>, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), SUM(synced), MIN(captured_at), MAX(captured_at) FROM records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let total = total as u64;
        let synced = synced.unwrap_or(0) as u64;

        Ok(StoreStats {
            total,
            synced,
            unsynced: total - synced,
            oldest: oldest.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
            newest: newest.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
        })
    }
}

fn timestamp(value: i64, column: usize) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })
}

fn parse_record(row: &Row<'_>) -> rusqlite::Result<SensorRecord> {
    let synced_at = match row.get::<_, Option<i64>>(12)? {
        Some(t) => Some(timestamp(t, 12)?),
        None => None,
    };

    Ok(SensorRecord {
        id: row.get(0)?,
        captured_at: timestamp(row.get(1)?, 1)?,
        readings: Readings {
            gas_level: row.get(2)?,
            sound_level: row.get(3)?,
            weight: row.get(4)?,
            temp_inside: row.get(5)?,
            temp_outside: row.get(6)?,
            humidity_inside: row.get(7)?,
            humidity_outside: row.get(8)?,
            pressure: row.get(9)?,
        },
        image_path: row.get(10)?,
        synced: row.get(11)?,
        synced_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivewatch_types::Channel;
    use proptest::prelude::*;
    use time::Duration;

    const DAY: std::time::Duration = std::time::Duration::from_secs(86_400);

    fn readings(weight: f64) -> Readings {
        Readings::new()
            .with(Channel::Weight, weight)
            .with(Channel::TempInside, 34.0)
    }

    fn insert(store: &Store, weight: f64) -> i64 {
        store.insert(&NewRecord::new(readings(weight))).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count(None).unwrap(), 0);
        assert!(store.fetch_unsynced().unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("records.db");
        {
            let store = Store::open(&path).unwrap();
            insert(&store, 1.0);
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_insert_and_get() {
        let store = Store::open_in_memory().unwrap();
        let record = NewRecord::new(readings(41_000.0)).with_image("img/1.jpg");
        let id = store.insert(&record).unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.readings.weight, Some(41_000.0));
        assert_eq!(stored.readings.pressure, None);
        assert_eq!(stored.image_path.as_deref(), Some("img/1.jpg"));
        assert!(!stored.synced);
        assert!(stored.synced_at.is_none());
        assert_eq!(
            stored.captured_at.unix_timestamp(),
            record.captured_at.unix_timestamp()
        );

        assert!(store.get(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_non_finite() {
        let store = Store::open_in_memory().unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let record = NewRecord::new(Readings::new().with(Channel::Pressure, bad));
            let err = store.insert(&record).unwrap_err();
            assert!(matches!(err, Error::InvalidRecord(_)));
            assert!(err.to_string().contains("pressure"));
        }
        assert_eq!(store.count(None).unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_empty_record() {
        let store = Store::open_in_memory().unwrap();
        let err = store.insert(&NewRecord::new(Readings::new())).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert_eq!(store.count(None).unwrap(), 0);

        // An image alone is enough to keep the record
        let id = store
            .insert(&NewRecord::new(Readings::new()).with_image("img/2.jpg"))
            .unwrap();
        assert!(store.get(id).unwrap().is_some());
    }

    #[test]
    fn test_ids_never_reused_after_delete() {
        let store = Store::open_in_memory().unwrap();
        let old = NewRecord::at(OffsetDateTime::now_utc() - Duration::days(300), readings(1.0));
        let first = store.insert(&old).unwrap();
        assert_eq!(store.prune_older_than(180 * DAY).unwrap(), 1);

        let second = insert(&store, 2.0);
        assert!(second > first);
    }

    #[test]
    fn test_fetch_unsynced_in_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        // Capture times deliberately out of order; delivery follows insertion.
        let a = store.insert(&NewRecord::at(now, readings(1.0))).unwrap();
        let b = store
            .insert(&NewRecord::at(now - Duration::hours(2), readings(2.0)))
            .unwrap();
        let c = store
            .insert(&NewRecord::at(now - Duration::hours(1), readings(3.0)))
            .unwrap();

        let ids: Vec<_> = store.fetch_unsynced().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, 1.0);

        assert!(store.mark_synced(id).unwrap());
        assert!(!store.mark_synced(id).unwrap());
        assert!(!store.mark_synced(9999).unwrap());

        let record = store.get(id).unwrap().unwrap();
        assert!(record.synced);
        assert!(record.synced_at.is_some());
        assert!(store.fetch_unsynced().unwrap().is_empty());
        assert_eq!(store.count(Some(true)).unwrap(), 1);
        assert_eq!(store.count(Some(false)).unwrap(), 0);
    }

    #[test]
    fn test_mark_synced_does_not_change_synced_at() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, 1.0);
        store.mark_synced(id).unwrap();
        let first = store.get(id).unwrap().unwrap().synced_at;
        store.mark_synced(id).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().synced_at, first);
    }

    #[test]
    fn test_prune_ignores_sync_state() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();

        let old_synced = store
            .insert(&NewRecord::at(now - Duration::days(200), readings(1.0)))
            .unwrap();
        store
            .insert(&NewRecord::at(now - Duration::days(200), readings(2.0)))
            .unwrap();
        let recent = store
            .insert(&NewRecord::at(now - Duration::days(10), readings(3.0)))
            .unwrap();
        store.mark_synced(old_synced).unwrap();

        let deleted = store.prune_older_than(180 * DAY).unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.query(&RecordQuery::new()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent);
    }

    #[test]
    fn test_prune_window_beyond_date_range_keeps_everything() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .insert(&NewRecord::at(now - Duration::days(200), readings(1.0)))
            .unwrap();

        assert_eq!(store.prune_older_than(5_000_000 * DAY).unwrap(), 0);
        assert_eq!(store.prune_older_than(std::time::Duration::MAX).unwrap(), 0);
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_fetch_latest_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        for i in 0..5 {
            store
                .insert(&NewRecord::at(now - Duration::minutes(10 - i), readings(i as f64)))
                .unwrap();
        }

        let latest = store.fetch_latest(3).unwrap();
        let weights: Vec<_> = latest.iter().map(|r| r.readings.weight.unwrap()).collect();
        assert_eq!(weights, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_query_filters() {
        let store = Store::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        let a = store
            .insert(&NewRecord::at(now - Duration::days(3), readings(1.0)))
            .unwrap();
        store
            .insert(&NewRecord::at(now - Duration::days(1), readings(2.0)))
            .unwrap();
        store.mark_synced(a).unwrap();

        let synced = store.query(&RecordQuery::new().synced()).unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].id, a);

        let recent = store
            .query(&RecordQuery::new().since(now - Duration::days(2)))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].readings.weight, Some(2.0));

        let page = store
            .query(&RecordQuery::new().oldest_first().limit(1).offset(1))
            .unwrap();
        assert_eq!(page[0].readings.weight, Some(2.0));
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        let a = insert(&store, 1.0);
        insert(&store, 2.0);
        insert(&store, 3.0);
        store.mark_synced(a).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.unsynced, 2);
        assert!(stats.oldest.is_some());
        assert!(stats.oldest <= stats.newest);
    }

    proptest! {
        #[test]
        fn prop_unsynced_follows_insertion_and_marks(marks in prop::collection::vec(any::<bool>(), 1..40)) {
            let store = Store::open_in_memory().unwrap();
            let ids: Vec<i64> = marks.iter().map(|_| insert(&store, 1.0)).collect();
            for (id, mark) in ids.iter().zip(&marks) {
                if *mark {
                    store.mark_synced(*id).unwrap();
                }
            }

            let expected: Vec<i64> = ids
                .iter()
                .zip(&marks)
                .filter(|(_, m)| !**m)
                .map(|(id, _)| *id)
                .collect();
            let actual: Vec<i64> = store.fetch_unsynced().unwrap().iter().map(|r| r.id).collect();
            prop_assert_eq!(actual, expected);
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
