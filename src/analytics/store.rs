//! SQLite storage for daily per-video metrics.
//!
//! One table, `video_analytics`, keyed by `(date, video)` with one REAL column per
//! metric in [`METRICS`] order, plus a `(video, date)` index for per-video history.
//! Inserts never overwrite: a row for an existing key is rejected by the primary
//! key and reported as a duplicate.

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, ErrorCode, Row, params_from_iter, types::Value};
use thiserror::Error;

use crate::analytics::models::{METRIC_COUNT, METRICS, MetricSet, ReportRow, StoredRecord};

const TABLE_NAME: &str = "video_analytics";
const INDEX_NAME: &str = "video_date_index";

#[derive(Error, Debug)]
pub(crate) enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unable to open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

/// Counts from one [`ResultStore::insert_rows`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct InsertSummary {
    pub(crate) inserted: usize,
    pub(crate) duplicates: usize,
}

pub(crate) struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Opens (creating if needed) the database file and makes sure the schema exists.
    pub(crate) fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self { conn };
        store.ensure_schema()?;
        info!("Result store ready: {}", path.display());
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Creates the table and index if they are missing. Safe to call on every run.
    pub(crate) fn ensure_schema(&self) -> StoreResult<()> {
        let create_table = create_table_sql();
        debug!("Executing: {}", create_table);
        self.conn.execute(&create_table, [])?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {INDEX_NAME} ON {TABLE_NAME} (video, date ASC)"
        );
        debug!("Executing: {}", create_index);
        self.conn.execute(&create_index, [])?;
        Ok(())
    }

    /// Inserts one record per row for `date`.
    ///
    /// Rows whose `(date, video)` key already exists are logged and counted as
    /// duplicates; the remaining rows are still inserted. Any other database error
    /// aborts the call.
    pub(crate) fn insert_rows(
        &self,
        date: NaiveDate,
        rows: &[ReportRow],
    ) -> StoreResult<InsertSummary> {
        let mut summary = InsertSummary::default();
        let mut stmt = self.conn.prepare(&insert_sql())?;

        for row in rows {
            let mut values: Vec<Value> = Vec::with_capacity(2 + METRIC_COUNT);
            values.push(Value::Text(date.format("%Y-%m-%d").to_string()));
            values.push(Value::Text(row.video_id.clone()));
            values.extend(row.metrics.values().iter().map(|v| Value::Real(*v)));

            trace!(
                "Inserting ({}, {}, {:?})",
                date,
                row.video_id,
                row.metrics.values()
            );
            match stmt.execute(params_from_iter(values)) {
                Ok(_) => summary.inserted += 1,
                Err(rusqlite::Error::SqliteFailure(e, message))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    error!(
                        "Inserting {} for {} failed: {}",
                        row.video_id,
                        date,
                        message.unwrap_or_else(|| e.to_string())
                    );
                    summary.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Stored {} rows for {} ({} duplicates rejected)",
            summary.inserted, date, summary.duplicates
        );
        Ok(summary)
    }

    /// Every record stored for `date`, ordered by video id.
    pub(crate) fn records_for_date(&self, date: NaiveDate) -> StoreResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT date, video, {} FROM {TABLE_NAME} WHERE date = ?1 ORDER BY video",
            METRICS.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([date.format("%Y-%m-%d").to_string()], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// A video's stored history, oldest first.
    pub(crate) fn history(&self, video_id: &str) -> StoreResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT date, video, {} FROM {TABLE_NAME} WHERE video = ?1 ORDER BY date ASC",
            METRICS.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([video_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn create_table_sql() -> String {
    let columns: Vec<String> = METRICS.iter().map(|m| format!("{m} real")).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (date date, video text, {}, PRIMARY KEY(date, video))",
        columns.join(", ")
    )
}

fn insert_sql() -> String {
    let placeholders: Vec<String> = (1..=2 + METRIC_COUNT).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {TABLE_NAME} (date, video, {}) VALUES ({})",
        METRICS.join(", "),
        placeholders.join(", ")
    )
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let date: NaiveDate = row.get(0)?;
    let video_id: String = row.get(1)?;
    let mut values = [0.0; METRIC_COUNT];
    for (i, value) in values.iter_mut().enumerate() {
        *value = row.get::<_, Option<f64>>(2 + i)?.unwrap_or_default();
    }
    Ok(StoredRecord {
        date,
        video_id,
        metrics: MetricSet::new(values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::models::Metric;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn row(video_id: &str, views: f64) -> ReportRow {
        ReportRow {
            video_id: video_id.to_string(),
            metrics: MetricSet::new([views, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        }
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let store = ResultStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();

        let index_count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [INDEX_NAME],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }

    #[test]
    fn stores_one_record_per_row_in_column_order() {
        let store = ResultStore::open_in_memory().unwrap();
        let summary = store
            .insert_rows(date(1), &[row("v1", 10.0), row("v2", 20.0)])
            .unwrap();
        assert_eq!(
            summary,
            InsertSummary {
                inserted: 2,
                duplicates: 0
            }
        );

        let records = store.records_for_date(date(1)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].video_id, "v1");
        assert_eq!(records[0].date, date(1));
        assert_eq!(records[1].metrics.get(Metric::Views), 20.0);
        assert_eq!(records[1].metrics.get(Metric::Shares), 6.0);

        let likes: f64 = store
            .conn
            .query_row(
                "SELECT likes FROM video_analytics WHERE video = 'v2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(likes, 4.0);
    }

    #[test]
    fn second_insert_of_same_rows_adds_nothing() {
        let store = ResultStore::open_in_memory().unwrap();
        let rows = [row("v1", 10.0), row("v2", 20.0)];
        store.insert_rows(date(1), &rows).unwrap();

        let again = store.insert_rows(date(1), &rows).unwrap();
        assert_eq!(
            again,
            InsertSummary {
                inserted: 0,
                duplicates: 2
            }
        );
        assert_eq!(store.records_for_date(date(1)).unwrap().len(), 2);
    }

    #[test]
    fn duplicates_do_not_overwrite_or_block_other_rows() {
        let store = ResultStore::open_in_memory().unwrap();
        store.insert_rows(date(1), &[row("v1", 10.0)]).unwrap();

        let summary = store
            .insert_rows(date(1), &[row("v1", 99.0), row("v3", 30.0)])
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.duplicates, 1);

        let records = store.records_for_date(date(1)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metrics.get(Metric::Views), 10.0);
    }

    #[test]
    fn same_video_on_different_days_is_history() {
        let store = ResultStore::open_in_memory().unwrap();
        store.insert_rows(date(3), &[row("v1", 30.0)]).unwrap();
        store.insert_rows(date(1), &[row("v1", 10.0)]).unwrap();
        store.insert_rows(date(2), &[row("v1", 20.0)]).unwrap();

        let history = store.history("v1").unwrap();
        let days: Vec<NaiveDate> = history.iter().map(|r| r.date).collect();
        assert_eq!(days, vec![date(1), date(2), date(3)]);
        assert!(store.history("v2").unwrap().is_empty());
    }

    #[test]
    fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video_analytics.db");

        {
            let store = ResultStore::open(&path).unwrap();
            store.insert_rows(date(1), &[row("v1", 10.0)]).unwrap();
        }

        let store = ResultStore::open(&path).unwrap();
        let summary = store.insert_rows(date(1), &[row("v1", 10.0)]).unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.records_for_date(date(1)).unwrap().len(), 1);
    }

    #[test]
    fn empty_row_set_changes_nothing() {
        let store = ResultStore::open_in_memory().unwrap();
        let summary = store.insert_rows(date(1), &[]).unwrap();
        assert_eq!(summary, InsertSummary::default());
        assert!(store.records_for_date(date(1)).unwrap().is_empty());
    }
}
