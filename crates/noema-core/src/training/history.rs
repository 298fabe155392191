//! Durable, append-oriented training history.
//!
//! Grounded directly on `storage::sqlite::Storage`'s `rusqlite`-backed
//! table + index pattern (`PRAGMA journal_mode = WAL`, one connection
//! guarded by a mutex rather than a reader/writer pool, since history
//! writes are infrequent relative to reasoning traffic).

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use super::contrastive::BatchResult;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("record_batch failed after retries: {0}")]
    RetriesExhausted(String),

    #[error("training history lock poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

impl From<HistoryError> for crate::error::NoemaError {
    fn from(e: HistoryError) -> Self {
        crate::error::NoemaError::PersistenceError(e.to_string())
    }
}

/// One persisted batch record.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub epoch: i64,
    pub batch_index: i64,
    pub loss: f32,
    pub gradient_norm: f32,
    pub active_triplets: i64,
    pub total_triplets: i64,
    pub training_time_ms: f64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregate stats over the whole ledger.
#[derive(Debug, Clone)]
pub struct HistoryStats {
    pub count: usize,
    pub best_loss: Option<f32>,
    pub latest_loss: Option<f32>,
    pub epochs: i64,
}

const RETRY_DELAYS_MS: [u64; 3] = [100, 200, 400];

/// Durable, `rusqlite`-backed training batch ledger.
pub struct TrainingHistory {
    conn: Mutex<Connection>,
}

impl TrainingHistory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS training_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                epoch INTEGER NOT NULL,
                batch_index INTEGER NOT NULL,
                loss REAL NOT NULL,
                gradient_norm REAL NOT NULL,
                active_triplets INTEGER NOT NULL,
                total_triplets INTEGER NOT NULL,
                training_time_ms REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_training_history_epoch ON training_history(epoch);
            CREATE INDEX IF NOT EXISTS idx_training_history_recorded_at ON training_history(recorded_at);",
        )?;
        Ok(())
    }

    /// Inserts one batch record with bounded retry (100/200/400ms) on
    /// transient sqlite errors (e.g. `SQLITE_BUSY`).
    pub fn record_batch(&self, result: &BatchResult) -> Result<i64> {
        let mut last_err = None;
        for delay in RETRY_DELAYS_MS {
            match self.try_insert(result) {
                Ok(id) => return Ok(id),
                Err(e) => {
                    tracing::warn!(error = %e, delay_ms = delay, "record_batch retrying");
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(delay));
                }
            }
        }
        match self.try_insert(result) {
            Ok(id) => Ok(id),
            Err(_) => Err(HistoryError::RetriesExhausted(
                last_err.map(|e| e.to_string()).unwrap_or_default(),
            )),
        }
    }

    fn try_insert(&self, result: &BatchResult) -> Result<i64> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO training_history
                (epoch, batch_index, loss, gradient_norm, active_triplets, total_triplets, training_time_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.epoch as i64,
                result.batch_index as i64,
                result.loss,
                result.gradient_norm,
                result.active_triplets as i64,
                result.total_triplets as i64,
                result.training_time_ms,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomic all-or-nothing bulk insert: either every record lands, or
    /// none does.
    pub fn record_batch_bulk(&self, results: &[BatchResult]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO training_history
                    (epoch, batch_index, loss, gradient_norm, active_triplets, total_triplets, training_time_ms, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let now = chrono::Utc::now().to_rfc3339();
            for result in results {
                stmt.execute(params![
                    result.epoch as i64,
                    result.batch_index as i64,
                    result.loss,
                    result.gradient_norm,
                    result.active_triplets as i64,
                    result.total_triplets as i64,
                    result.training_time_ms,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All records, oldest first, optionally bounded to an epoch range
    /// (inclusive on both ends).
    pub fn get_history(&self, epoch_range: Option<(i64, i64)>) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let (sql, params): (&str, Vec<i64>) = match epoch_range {
            Some((lo, hi)) => (
                "SELECT id, epoch, batch_index, loss, gradient_norm, active_triplets, total_triplets, training_time_ms, recorded_at
                 FROM training_history WHERE epoch BETWEEN ?1 AND ?2 ORDER BY id ASC",
                vec![lo, hi],
            ),
            None => (
                "SELECT id, epoch, batch_index, loss, gradient_norm, active_triplets, total_triplets, training_time_ms, recorded_at
                 FROM training_history ORDER BY id ASC",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_latest_loss(&self) -> Result<Option<f32>> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        conn.query_row(
            "SELECT loss FROM training_history ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Loss series over the last `window` records, oldest to newest.
    pub fn get_loss_trend(&self, window: usize) -> Result<Vec<f32>> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let mut stmt = conn.prepare(
            "SELECT loss FROM training_history ORDER BY id DESC LIMIT ?1",
        )?;
        let mut losses: Vec<f32> = stmt
            .query_map(params![window as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        losses.reverse();
        Ok(losses)
    }

    pub fn get_epoch_history(&self, epoch: i64) -> Result<Vec<HistoryRecord>> {
        self.get_history(Some((epoch, epoch)))
    }

    pub fn get_epoch_average_loss(&self, epoch: i64) -> Result<Option<f32>> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        conn.query_row(
            "SELECT AVG(loss) FROM training_history WHERE epoch = ?1",
            params![epoch],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_best_loss(&self) -> Result<Option<f32>> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        conn.query_row("SELECT MIN(loss) FROM training_history", [], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    /// Compares the mean loss of the first half of the last `window`
    /// records against the second half; improving if the second half is
    /// lower.
    pub fn is_loss_improving(&self, window: usize) -> Result<bool> {
        let losses = self.get_loss_trend(window)?;
        if losses.len() < 2 {
            return Ok(false);
        }
        let mid = losses.len() / 2;
        let (first, second) = losses.split_at(mid);
        let mean = |xs: &[f32]| xs.iter().sum::<f32>() / xs.len() as f32;
        Ok(mean(second) < mean(first))
    }

    pub fn cleanup(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let deleted = conn.execute(
            "DELETE FROM training_history WHERE recorded_at < ?1",
            params![older_than.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM training_history", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM training_history WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn get_stats(&self) -> Result<HistoryStats> {
        Ok(HistoryStats {
            count: self.count()?,
            best_loss: self.get_best_loss()?,
            latest_loss: self.get_latest_loss()?,
            epochs: {
                let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned("training history mutex poisoned".into()))?;
                conn.query_row(
                    "SELECT COALESCE(MAX(epoch), -1) + 1 FROM training_history",
                    [],
                    |row| row.get(0),
                )?
            },
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let recorded_at_raw: String = row.get(8)?;
    let recorded_at = chrono::DateTime::parse_from_rfc3339(&recorded_at_raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    Ok(HistoryRecord {
        id: row.get(0)?,
        epoch: row.get(1)?,
        batch_index: row.get(2)?,
        loss: row.get(3)?,
        gradient_norm: row.get(4)?,
        active_triplets: row.get(5)?,
        total_triplets: row.get(6)?,
        training_time_ms: row.get(7)?,
        recorded_at,
    })
}
