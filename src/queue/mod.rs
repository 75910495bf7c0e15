//! At-least-once job queue.
//!
//! The queue owns everything about delivery: attempt counting, leases,
//! retry/backoff and the dead-letter (failed) history. Handlers only
//! report success or failure.
//!
//! # Delivery
//!
//! ```text
//! enqueue → waiting ──reserve──→ active ──complete──→ completed (history)
//!              ↑                    │
//!              └──── backoff ───────┤ fail, attempts left
//!                                   └─ fail, exhausted ──→ failed (history)
//! ```
//!
//! An active job whose lease expires (crashed consumer) is delivered again.

pub mod consumer;
pub mod memory;
pub mod retry;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use consumer::{Consumer, ConsumerOptions, JobHandler, Processed};
pub use memory::MemoryQueue;
pub use retry::RetryPolicy;
pub use sqlite::SqliteQueue;

/// Name of the evidence verification channel
pub const VERIFY_QUEUE: &str = "verify-evidence";

/// Queue-assigned job identifier
pub type JobId = i64;

/// Errors from a job queue backend
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job {0} is no longer leased by this consumer")]
    LeaseLost(JobId),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready now or after its backoff delay
    Waiting,

    /// Leased to a consumer
    Active,

    /// Handler succeeded
    Completed,

    /// Attempts exhausted
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// A job handed to one consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: JobId,

    /// Job name given at enqueue time
    pub name: String,

    /// Application payload
    pub payload: Value,

    /// 1-indexed attempt number of this delivery
    pub attempt: u32,

    pub enqueued_at: DateTime<Utc>,

    /// Proves ownership when completing or failing
    pub lease_token: Uuid,
}

/// Snapshot of a job, used for history and inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    pub state: JobState,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// What the queue did with a failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt after `delay`
    Retrying { attempt: u32, delay: Duration },

    /// Moved to the failed history
    DeadLettered { attempts: u32 },
}

/// Job counts per state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Total jobs currently tracked (history is capped)
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// Queue behaviour shared by all backends
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Channel name
    pub name: String,

    /// Retry policy for failed deliveries
    pub retry: RetryPolicy,

    /// Completed jobs retained for inspection
    pub keep_completed: usize,

    /// Failed jobs retained for inspection
    pub keep_failed: usize,

    /// How long a delivery stays leased before it is redelivered. Must
    /// outlast the consumer's job timeout, or a timed-out job is picked up
    /// again before its backoff applies.
    pub lease: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            name: VERIFY_QUEUE.to_string(),
            retry: RetryPolicy::default(),
            keep_completed: 50,
            keep_failed: 50,
            lease: Duration::from_secs(35),
        }
    }
}

/// Durable, at-least-once job channel
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Append a job; returns once the backend acknowledged the write
    async fn enqueue(&self, name: &str, payload: Value) -> Result<JobId, QueueError>;

    /// Lease the next ready job, if any
    async fn reserve(&self) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a successful delivery
    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Report a failed delivery and apply the retry policy
    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<FailOutcome, QueueError>;

    /// Counts per state
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Most recent jobs in a state, newest first
    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<JobRecord>, QueueError>;

    /// Wait for new work or until `timeout` passes
    async fn wait_for_job(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}
