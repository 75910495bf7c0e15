//! SQLite-backed evidence store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{EvidenceStore, StoreError};
use crate::db::Database;
use crate::domain::{Evidence, EvidenceStatus, EvidenceUpdate, NewEvidence};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS evidence (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    claim_id    INTEGER NOT NULL,
    source      TEXT    NOT NULL,
    excerpt     TEXT    NOT NULL,
    file_path   TEXT,
    status      TEXT    NOT NULL DEFAULT 'PENDING',
    score       INTEGER,
    reason      TEXT,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS evidence_claim_idx ON evidence (claim_id);
";

const COLUMNS: &str =
    "id, claim_id, source, excerpt, file_path, status, score, reason, created_at, updated_at";

/// Durable evidence store
#[derive(Debug, Clone)]
pub struct SqliteEvidenceStore {
    db: Database,
}

impl SqliteEvidenceStore {
    /// Open the database file and make sure the schema exists
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let db = Database::open(path).await?;
        Self::with_database(db).await
    }

    /// Use an already opened database (shared with the job queue)
    pub async fn with_database(db: Database) -> Result<Self, StoreError> {
        db.call(|conn| -> Result<(), StoreError> {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        debug!("Evidence schema ready");
        Ok(Self { db })
    }

    /// Release the connection
    pub async fn close(self) -> Result<(), StoreError> {
        self.db.close().await?;
        Ok(())
    }
}

fn row_to_evidence(row: &Row<'_>) -> rusqlite::Result<Evidence> {
    let status: String = row.get(5)?;
    let status = status.parse::<EvidenceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Evidence {
        id: row.get(0)?,
        claim_id: row.get(1)?,
        source: row.get(2)?,
        excerpt: row.get(3)?,
        file_path: row.get(4)?,
        status,
        score: row.get(6)?,
        reason: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn select_one(conn: &Connection, id: i64) -> rusqlite::Result<Option<Evidence>> {
    conn.query_row(
        &format!("SELECT {} FROM evidence WHERE id = ?1", COLUMNS),
        params![id],
        row_to_evidence,
    )
    .optional()
}

#[async_trait]
impl EvidenceStore for SqliteEvidenceStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<Evidence>, StoreError> {
        self.db
            .call(move |conn| -> Result<Option<Evidence>, StoreError> {
                Ok(select_one(conn, id)?)
            })
            .await
    }

    async fn update(&self, id: i64, update: EvidenceUpdate) -> Result<bool, StoreError> {
        self.db
            .call(move |conn| -> Result<bool, StoreError> {
                // Single statement; COALESCE keeps fields the update leaves out
                let changed = conn.execute(
                    "UPDATE evidence SET
                        status = COALESCE(?2, status),
                        score = COALESCE(?3, score),
                        reason = CASE WHEN ?4 THEN ?5 ELSE reason END,
                        updated_at = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        update.status.map(|s| s.as_str()),
                        update.score,
                        update.reason.is_some(),
                        update.reason.clone().flatten(),
                        Utc::now(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn insert(&self, evidence: NewEvidence) -> Result<Evidence, StoreError> {
        self.db
            .call(move |conn| -> Result<Evidence, StoreError> {
                let now = Utc::now();
                conn.execute(
                    "INSERT INTO evidence (claim_id, source, excerpt, file_path, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        evidence.claim_id,
                        evidence.source,
                        evidence.excerpt,
                        evidence.file_path,
                        EvidenceStatus::Pending.as_str(),
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                select_one(conn, id)?.ok_or_else(|| StoreError::Corrupt {
                    id,
                    message: "inserted row not found".to_string(),
                })
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db
            .call(move |conn| -> Result<bool, StoreError> {
                Ok(conn.execute("DELETE FROM evidence WHERE id = ?1", params![id])? > 0)
            })
            .await
    }

    async fn list(&self, claim_id: Option<i64>) -> Result<Vec<Evidence>, StoreError> {
        self.db
            .call(move |conn| -> Result<Vec<Evidence>, StoreError> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM evidence
                     WHERE ?1 IS NULL OR claim_id = ?1
                     ORDER BY id DESC",
                    COLUMNS
                ))?;
                let rows = stmt.query_map(params![claim_id], row_to_evidence)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }
}
