use crate::models::HistoryPoint;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;

/// One week of one-minute samples.
pub const DEFAULT_MAX_ENTRIES: usize = 30 * 24 * 7;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("time conversion error: {0}")]
    Time(#[from] std::time::SystemTimeError),
    #[error("value out of range for column {0}")]
    OutOfRange(&'static str),
}

/// Append-only series of per-cycle samples.
pub trait HistoryStore: Send + Sync {
    fn append(&self, point: &HistoryPoint) -> Result<(), StorageError>;

    /// Loads the newest `limit` samples (all when `None`) in chronological order.
    fn load(&self, limit: Option<usize>) -> Result<Vec<HistoryPoint>, StorageError>;
}

#[derive(Debug)]
pub struct HistoryRepository {
    connection: Mutex<Connection>,
    max_entries: usize,
}

impl HistoryRepository {
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?, max_entries)
    }

    pub fn in_memory(max_entries: usize) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, max_entries)
    }

    fn with_connection(connection: Connection, max_entries: usize) -> Result<Self, StorageError> {
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cycle_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at_unix INTEGER NOT NULL,
                total_missed INTEGER NOT NULL,
                voting_power INTEGER
            );
            ",
        )?;

        Ok(Self {
            connection: Mutex::new(connection),
            max_entries: max_entries.max(1),
        })
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let count: i64 = self.with_conn(|connection| {
            connection.query_row("SELECT COUNT(*) FROM cycle_history", [], |row| row.get(0))
        })?;
        usize::try_from(count).map_err(|_| StorageError::OutOfRange("count"))
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn with_conn<T>(
        &self,
        operation: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let connection = match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(operation(&connection)?)
    }
}

impl HistoryStore for HistoryRepository {
    fn append(&self, point: &HistoryPoint) -> Result<(), StorageError> {
        let recorded_at = i64::try_from(point.timestamp.duration_since(UNIX_EPOCH)?.as_secs())
            .map_err(|_| StorageError::OutOfRange("recorded_at_unix"))?;
        let total_missed = i64::try_from(point.total_missed)
            .map_err(|_| StorageError::OutOfRange("total_missed"))?;
        let voting_power = point
            .voting_power
            .map(i64::try_from)
            .transpose()
            .map_err(|_| StorageError::OutOfRange("voting_power"))?;
        let keep = i64::try_from(self.max_entries).unwrap_or(i64::MAX);

        self.with_conn(|connection| {
            connection.execute(
                "
                INSERT INTO cycle_history (recorded_at_unix, total_missed, voting_power)
                VALUES (?1, ?2, ?3)
                ",
                params![recorded_at, total_missed, voting_power],
            )?;
            connection.execute(
                "
                DELETE FROM cycle_history
                WHERE id <= (SELECT id FROM cycle_history ORDER BY id DESC LIMIT 1 OFFSET ?1)
                ",
                params![keep],
            )?;
            Ok(())
        })
    }

    fn load(&self, limit: Option<usize>) -> Result<Vec<HistoryPoint>, StorageError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows: Vec<(i64, i64, Option<i64>)> = self.with_conn(|connection| {
            let mut statement = connection.prepare(
                "
                SELECT recorded_at_unix, total_missed, voting_power FROM (
                    SELECT id, recorded_at_unix, total_missed, voting_power
                    FROM cycle_history
                    ORDER BY id DESC
                    LIMIT ?1
                )
                ORDER BY id ASC
                ",
            )?;
            let rows = statement.query_map([limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect()
        })?;

        rows.into_iter()
            .map(|(recorded_at, total_missed, voting_power)| {
                let seconds = u64::try_from(recorded_at)
                    .map_err(|_| StorageError::OutOfRange("recorded_at_unix"))?;
                Ok(HistoryPoint {
                    timestamp: UNIX_EPOCH + Duration::from_secs(seconds),
                    total_missed: u64::try_from(total_missed)
                        .map_err(|_| StorageError::OutOfRange("total_missed"))?,
                    voting_power: voting_power
                        .map(u64::try_from)
                        .transpose()
                        .map_err(|_| StorageError::OutOfRange("voting_power"))?,
                })
            })
            .collect()
    }
}
