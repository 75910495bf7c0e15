//! Evidence storage.
//!
//! The pipeline only needs keyed get/update. Insert, delete and listing are
//! used by the producer side and the CLI.
//!
//! - `SqliteEvidenceStore`: durable store shared by API and workers
//! - `MemoryEvidenceStore`: in-process store for tests

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Evidence, EvidenceUpdate, NewEvidence};

pub use memory::MemoryEvidenceStore;
pub use sqlite::SqliteEvidenceStore;

/// Errors from an evidence store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: i64, message: String },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Keyed evidence storage
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Fetch a record, `None` if it does not exist
    async fn get_by_id(&self, id: i64) -> Result<Option<Evidence>, StoreError>;

    /// Apply a partial update. Returns `false` if the record does not exist.
    async fn update(&self, id: i64, update: EvidenceUpdate) -> Result<bool, StoreError>;

    /// Insert a new record in `Pending`
    async fn insert(&self, evidence: NewEvidence) -> Result<Evidence, StoreError>;

    /// Delete a record. Returns `false` if it did not exist.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    /// List records, newest first, optionally for one claim
    async fn list(&self, claim_id: Option<i64>) -> Result<Vec<Evidence>, StoreError>;
}
