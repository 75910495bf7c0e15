//! Verification worker: the job handler behind the `verify-evidence` queue.
//!
//! Per job:
//! 1. Look up the evidence; if it is gone the job is a no-op
//! 2. Mark it `RUNNING` and clear the reason
//! 3. Wait the simulated verification latency
//! 4. Score it and write `VERIFIED` or `REJECTED` with score and reason
//! 5. Count the outcome
//!
//! Store errors fail the job and the queue decides whether to retry. A
//! rejection is a successful outcome. Concurrent jobs for the same evidence
//! are not serialized: the last write wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::{EvidenceUpdate, VerificationJob};
use crate::metrics::{Outcome, WorkerMetrics};
use crate::queue::{Delivery, JobHandler};
use crate::store::{EvidenceStore, StoreError};

use super::scorer::{score_evidence, Verdict};

/// Why a verification job failed
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("Evidence store error: {0}")]
    Store(#[from] StoreError),
}

/// Successful result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Evidence reached the threshold
    Verified { evidence_id: i64, score: i32 },

    /// Evidence stayed below the threshold
    Rejected { evidence_id: i64, score: i32 },

    /// Evidence no longer exists; nothing was written or counted
    Vanished { evidence_id: i64 },
}

/// Drives the evidence state machine
pub struct VerificationWorker {
    store: Arc<dyn EvidenceStore>,
    metrics: WorkerMetrics,
    latency: Duration,
}

impl VerificationWorker {
    pub fn new(store: Arc<dyn EvidenceStore>, metrics: WorkerMetrics) -> Self {
        Self {
            store,
            metrics,
            latency: Duration::ZERO,
        }
    }

    /// Simulated verification cost awaited between RUNNING and the verdict
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Verify one evidence record
    #[instrument(skip(self), fields(evidence_id = job.evidence_id))]
    pub async fn verify(&self, job: VerificationJob) -> Result<JobOutcome, JobError> {
        let evidence_id = job.evidence_id;

        let Some(evidence) = self.store.get_by_id(evidence_id).await? else {
            info!("Evidence not found, skipping");
            return Ok(JobOutcome::Vanished { evidence_id });
        };

        if !self.store.update(evidence_id, EvidenceUpdate::running()).await? {
            info!("Evidence deleted before verification started");
            return Ok(JobOutcome::Vanished { evidence_id });
        }
        debug!(previous = %evidence.status, "Evidence running");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let verdict = Verdict::from_score(score_evidence(&evidence.source, &evidence.excerpt));
        let update = EvidenceUpdate::verdict(verdict.status, verdict.score, verdict.reason);

        if !self.store.update(evidence_id, update).await? {
            info!("Evidence deleted during verification");
            return Ok(JobOutcome::Vanished { evidence_id });
        }

        let outcome = if verdict.is_verified() {
            self.metrics.record_outcome(Outcome::Verified);
            JobOutcome::Verified { evidence_id, score: verdict.score }
        } else {
            self.metrics.record_outcome(Outcome::Rejected);
            JobOutcome::Rejected { evidence_id, score: verdict.score }
        };

        info!(score = verdict.score, status = %verdict.status, "Evidence verified");
        Ok(outcome)
    }
}

#[async_trait]
impl JobHandler for VerificationWorker {
    type Output = JobOutcome;
    type Error = JobError;

    async fn handle(&self, delivery: &Delivery) -> Result<JobOutcome, JobError> {
        let job = VerificationJob::from_payload(&delivery.payload).map_err(JobError::MalformedJob)?;
        self.verify(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvidenceStatus, NewEvidence};
    use crate::store::MemoryEvidenceStore;

    fn worker(store: Arc<MemoryEvidenceStore>) -> VerificationWorker {
        VerificationWorker::new(store, WorkerMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_verify_scholarly_evidence() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let ev = store
            .insert(NewEvidence::text(1, "Journal of X", "A".repeat(300)))
            .await
            .unwrap();
        let worker = worker(store.clone());

        let outcome = worker.verify(VerificationJob::new(ev.id)).await.unwrap();
        assert_eq!(outcome, JobOutcome::Verified { evidence_id: ev.id, score: 6 });

        let loaded = store.get_by_id(ev.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EvidenceStatus::Verified);
        assert_eq!(loaded.score, Some(6));
        assert_eq!(loaded.reason.as_deref(), Some("consistency ok"));
        assert_eq!(worker.metrics().outcome_count(Outcome::Verified), 1);
    }

    #[tokio::test]
    async fn test_missing_evidence_is_noop() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let worker = worker(store);

        let outcome = worker.verify(VerificationJob::new(12)).await.unwrap();
        assert_eq!(outcome, JobOutcome::Vanished { evidence_id: 12 });
        assert_eq!(worker.metrics().outcome_count(Outcome::Verified), 0);
        assert_eq!(worker.metrics().outcome_count(Outcome::Rejected), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_is_visible_during_latency() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let ev = store.insert(NewEvidence::text(1, "wikipedia", "short")).await.unwrap();
        let worker = Arc::new(worker(store.clone()).with_latency(Duration::from_millis(900)));

        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.verify(VerificationJob::new(ev.id)).await })
        };

        // Let the job reach its simulated latency
        tokio::time::sleep(Duration::from_millis(100)).await;
        let running = store.get_by_id(ev.id).await.unwrap().unwrap();
        assert_eq!(running.status, EvidenceStatus::Running);
        assert_eq!(running.reason, None);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Rejected { evidence_id: ev.id, score: -4 });
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let worker = worker(store);
        let delivery = Delivery {
            id: 1,
            name: "verify".to_string(),
            payload: serde_json::json!({ "evidenceId": "abc" }),
            attempt: 1,
            enqueued_at: chrono::Utc::now(),
            lease_token: uuid::Uuid::new_v4(),
        };

        let err = worker.handle(&delivery).await.unwrap_err();
        assert!(matches!(err, JobError::MalformedJob(_)));
    }
}
