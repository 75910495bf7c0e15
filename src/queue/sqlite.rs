//! SQLite-backed durable job queue.
//!
//! Several worker processes may share one database file. Reservation runs
//! in an immediate transaction, so a ready job is leased to exactly one
//! consumer at a time.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Delivery, FailOutcome, JobId, JobQueue, JobRecord, JobState, QueueError, QueueOptions,
    QueueStats,
};
use crate::db::Database;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    queue         TEXT    NOT NULL,
    name          TEXT    NOT NULL,
    payload       TEXT    NOT NULL,
    state         TEXT    NOT NULL,
    attempts      INTEGER NOT NULL DEFAULT 0,
    available_at  INTEGER NOT NULL,
    lease_token   TEXT,
    lease_until   INTEGER,
    enqueued_at   INTEGER NOT NULL,
    finished_at   INTEGER,
    last_error    TEXT
);
CREATE INDEX IF NOT EXISTS jobs_ready_idx ON jobs (queue, state, available_at);
";

const COLUMNS: &str = "id, name, payload, state, attempts, enqueued_at, finished_at, last_error";

/// Durable queue stored in a `jobs` table
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    db: Database,
    options: QueueOptions,
}

impl SqliteQueue {
    /// Open the database file and make sure the schema exists
    pub async fn connect(path: &Path, options: QueueOptions) -> Result<Self, QueueError> {
        let db = Database::open(path).await?;
        Self::with_database(db, options).await
    }

    /// Use an already opened database (shared with the evidence store)
    pub async fn with_database(db: Database, options: QueueOptions) -> Result<Self, QueueError> {
        db.call(|conn| -> Result<(), QueueError> {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { db, options })
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Release the connection
    pub async fn close(self) -> Result<(), QueueError> {
        self.db.close().await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `now + after` in unix millis, saturating at `i64::MAX`
fn millis_after(now: i64, after: Duration) -> i64 {
    now.saturating_add(i64::try_from(after.as_millis()).unwrap_or(i64::MAX))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let payload: String = row.get(2)?;
    let payload: Value = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let state: String = row.get(3)?;
    let state = state.parse::<JobState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let finished_at: Option<i64> = row.get(6)?;

    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        payload,
        state,
        attempts: row.get(4)?,
        enqueued_at: from_millis(row.get(5)?),
        finished_at: finished_at.map(from_millis),
        error: row.get(7)?,
    })
}

/// Keep only the newest `keep` rows in a finished state
fn trim_history(conn: &Connection, queue: &str, state: JobState, keep: usize) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM jobs
         WHERE queue = ?1 AND state = ?2 AND id NOT IN (
             SELECT id FROM jobs WHERE queue = ?1 AND state = ?2
             ORDER BY finished_at DESC, id DESC LIMIT ?3
         )",
        params![queue, state.as_str(), keep as i64],
    )
}

/// Move an owned, active job to a finished state
fn finish(
    conn: &Connection,
    options: &QueueOptions,
    delivery: &Delivery,
    state: JobState,
    error: Option<&str>,
) -> Result<(), QueueError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = ?3, finished_at = ?4, last_error = ?5,
                         lease_token = NULL, lease_until = NULL
         WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
        params![
            delivery.id,
            delivery.lease_token.to_string(),
            state.as_str(),
            now_millis(),
            error,
        ],
    )?;
    if changed == 0 {
        return Err(QueueError::LeaseLost(delivery.id));
    }

    let keep = match state {
        JobState::Completed => options.keep_completed,
        _ => options.keep_failed,
    };
    trim_history(conn, &options.name, state, keep)?;
    Ok(())
}

fn reserve_next(conn: &mut Connection, options: &QueueOptions) -> Result<Option<Delivery>, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = now_millis();

    let delivery = loop {
        let candidate: Option<(JobId, String, u32)> = tx
            .query_row(
                "SELECT id, state, attempts FROM jobs
                 WHERE queue = ?1 AND (
                     (state = 'waiting' AND available_at <= ?2)
                     OR (state = 'active' AND lease_until <= ?2)
                 )
                 ORDER BY available_at, id LIMIT 1",
                params![options.name, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, state, attempts)) = candidate else {
            break None;
        };

        if state == JobState::Active.as_str() {
            // Lease expired: the previous consumer is presumed dead
            if attempts >= options.retry.max_attempts {
                warn!(job_id = id, attempts, "Lease expired on final attempt");
                tx.execute(
                    "UPDATE jobs SET state = 'failed', finished_at = ?2, last_error = ?3,
                                     lease_token = NULL, lease_until = NULL
                     WHERE id = ?1",
                    params![id, now, format!("lease expired after {} attempts", attempts)],
                )?;
                trim_history(&tx, &options.name, JobState::Failed, options.keep_failed)?;
                continue;
            }
            warn!(job_id = id, "Lease expired, redelivering");
        }

        let token = Uuid::new_v4();
        let lease_until = millis_after(now, options.lease);
        tx.execute(
            "UPDATE jobs SET state = 'active', attempts = attempts + 1,
                             lease_token = ?2, lease_until = ?3
             WHERE id = ?1",
            params![id, token.to_string(), lease_until],
        )?;

        let (name, payload, attempt, enqueued_at): (String, String, u32, i64) = tx.query_row(
            "SELECT name, payload, attempts, enqueued_at FROM jobs WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        break Some(Delivery {
            id,
            name,
            payload: serde_json::from_str(&payload)?,
            attempt,
            enqueued_at: from_millis(enqueued_at),
            lease_token: token,
        });
    };

    tx.commit()?;
    Ok(delivery)
}

#[async_trait]
impl JobQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn enqueue(&self, name: &str, payload: Value) -> Result<JobId, QueueError> {
        let queue = self.options.name.clone();
        let name = name.to_string();
        let payload = serde_json::to_string(&payload)?;

        let id = self
            .db
            .call(move |conn| -> Result<JobId, QueueError> {
                let now = now_millis();
                conn.execute(
                    "INSERT INTO jobs (queue, name, payload, state, available_at, enqueued_at)
                     VALUES (?1, ?2, ?3, 'waiting', ?4, ?4)",
                    params![queue, name, payload, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(queue = %self.options.name, job_id = id, "Enqueued job");
        Ok(id)
    }

    async fn reserve(&self) -> Result<Option<Delivery>, QueueError> {
        let options = self.options.clone();
        self.db
            .call(move |conn| reserve_next(conn, &options))
            .await
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let options = self.options.clone();
        let delivery = delivery.clone();
        self.db
            .call(move |conn| finish(conn, &options, &delivery, JobState::Completed, None))
            .await
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<FailOutcome, QueueError> {
        let options = self.options.clone();
        let delivery = delivery.clone();
        let error = error.to_string();

        self.db
            .call(move |conn| -> Result<FailOutcome, QueueError> {
                let retry = &options.retry;
                if !retry.should_retry(delivery.attempt) {
                    finish(conn, &options, &delivery, JobState::Failed, Some(&error))?;
                    return Ok(FailOutcome::DeadLettered {
                        attempts: delivery.attempt,
                    });
                }

                let delay = retry.delay_for_attempt(delivery.attempt);
                let changed = conn.execute(
                    "UPDATE jobs SET state = 'waiting', available_at = ?3, last_error = ?4,
                                     lease_token = NULL, lease_until = NULL
                     WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
                    params![
                        delivery.id,
                        delivery.lease_token.to_string(),
                        millis_after(now_millis(), delay),
                        error,
                    ],
                )?;
                if changed == 0 {
                    return Err(QueueError::LeaseLost(delivery.id));
                }

                Ok(FailOutcome::Retrying {
                    attempt: delivery.attempt,
                    delay,
                })
            })
            .await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let queue = self.options.name.clone();
        self.db
            .call(move |conn| -> Result<QueueStats, QueueError> {
                let mut stmt =
                    conn.prepare("SELECT state, COUNT(*) FROM jobs WHERE queue = ?1 GROUP BY state")?;
                let rows = stmt.query_map(params![queue], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;

                let mut stats = QueueStats::default();
                for row in rows {
                    let (state, count) = row?;
                    let count = count as usize;
                    match state.parse::<JobState>() {
                        Ok(JobState::Waiting) => stats.waiting = count,
                        Ok(JobState::Active) => stats.active = count,
                        Ok(JobState::Completed) => stats.completed = count,
                        Ok(JobState::Failed) => stats.failed = count,
                        Err(e) => warn!(error = %e, "Skipping unknown job state"),
                    }
                }
                Ok(stats)
            })
            .await
    }

    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let queue = self.options.name.clone();
        self.db
            .call(move |conn| -> Result<Vec<JobRecord>, QueueError> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE queue = ?1 AND state = ?2
                     ORDER BY COALESCE(finished_at, enqueued_at) DESC, id DESC LIMIT ?3",
                    COLUMNS
                ))?;
                let rows = stmt.query_map(params![queue, state.as_str(), limit as i64], row_to_record)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }
}
