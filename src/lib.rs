//! claimcheck - Asynchronous evidence verification pipeline
//!
//! Evidence submitted for a claim is stored as `PENDING` and a verification
//! job is queued. Workers consume the queue, score the evidence with a
//! keyword heuristic and record a `VERIFIED` or `REJECTED` verdict.
//!
//! # Architecture
//!
//! - Producers insert evidence and enqueue `verify` jobs; they never wait
//! - The queue owns retries, backoff, leases and the failed history
//! - Workers drive `PENDING -> RUNNING -> VERIFIED | REJECTED`
//! - Outcomes are counted in `worker_jobs_total{result}` and served at `/metrics`
//!
//! # Modules
//!
//! - `core`: Scorer, worker, producer and process wiring
//! - `domain`: Data structures (Evidence, VerificationJob)
//! - `queue`: Durable job queue and consumer loop
//! - `store`: Evidence persistence
//! - `metrics`: Prometheus counters and exporter
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a worker
//! claimcheck worker --concurrency 4
//!
//! # Submit evidence
//! claimcheck evidence add --claim 1 --source "Journal of X" --excerpt "..."
//!
//! # Check the verdict
//! claimcheck evidence show 1
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod domain;
pub mod metrics;
pub mod queue;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{score_evidence, Producer, VerificationWorker, Verdict};
pub use domain::{Evidence, EvidenceStatus, EvidenceUpdate, NewEvidence, VerificationJob};
pub use metrics::{Outcome, WorkerMetrics};
pub use queue::{Consumer, JobQueue, MemoryQueue, SqliteQueue};
pub use store::{EvidenceStore, MemoryEvidenceStore, SqliteEvidenceStore};
