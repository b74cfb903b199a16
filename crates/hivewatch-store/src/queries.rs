//! Query builder for stored records.
//!
//! # Example
//!
//! ```
//! use hivewatch_store::{RecordQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // Everything captured in the last day that has not been delivered yet
//! let query = RecordQuery::new().unsynced().since(yesterday).limit(100);
//! let records = store.query(&query)?;
//! # Ok::<(), hivewatch_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Columns selected for every record query, in `SensorRecord` field order.
pub(crate) const RECORD_COLUMNS: &str = "id, captured_at, gas_level, sound_level, weight, \
     temp_inside, temp_outside, humidity_inside, humidity_outside, pressure, \
     image_path, synced, synced_at";

/// Fluent query builder for records.
///
/// By default, queries return every record, newest first (by capture time,
/// then by id).
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Filter on the synced flag.
    pub synced: Option<bool>,
    /// Include only records captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only records captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order newest first.
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query with default settings.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only records the endpoint has acknowledged.
    pub fn synced(mut self) -> Self {
        self.synced = Some(true);
        self
    }

    /// Only records still awaiting delivery.
    pub fn unsynced(mut self) -> Self {
        self.synced = Some(false);
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(synced) = self.synced {
            conditions.push("synced = ?");
            params.push(Box::new(synced));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records {where_clause} \
             ORDER BY captured_at {order}, id {order}"
        );

        // SQLite requires a LIMIT before OFFSET
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query() {
        let query = RecordQuery::new();
        assert!(query.newest_first);
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().ends_with("ORDER BY captured_at DESC, id DESC"));
    }

    #[test]
    fn test_filters_in_where_clause() {
        let now = OffsetDateTime::now_utc();
        let query = RecordQuery::new().unsynced().since(now).until(now);
        let (where_clause, params) = query.build_where();
        assert_eq!(
            where_clause,
            "WHERE synced = ? AND captured_at >= ? AND captured_at <= ?"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_pagination() {
        let sql = RecordQuery::new().oldest_first().limit(10).offset(20).build_sql();
        assert!(sql.contains("ORDER BY captured_at ASC, id ASC"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 20"));

        let sql = RecordQuery::new().offset(5).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }
}
