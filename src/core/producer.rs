//! Producer side of the verification queue.
//!
//! Creates evidence in `PENDING` and enqueues one verification job per
//! creation or re-verification request. Callers never wait for the verdict.
//! Caller identity and workspace membership are checked before this point.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::domain::{Evidence, NewEvidence, VerificationJob, VERIFY_JOB_NAME};
use crate::queue::{JobId, JobQueue, QueueError};
use crate::store::{EvidenceStore, StoreError};

/// Longest excerpt kept from an extracted document, in characters
pub const DOCUMENT_EXCERPT_CHARS: usize = 700;

/// Excerpt used when a document yielded no text
pub const EMPTY_DOCUMENT_EXCERPT: &str = "(document without extractable text)";

/// Errors returned to the API layer
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Invalid evidence: {0}")]
    Invalid(String),

    #[error("Evidence not found: {0}")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A created evidence record and the job queued for it
#[derive(Debug, Clone)]
pub struct Submission {
    pub evidence: Evidence,
    pub job_id: JobId,
}

/// Enqueues verification work
pub struct Producer {
    store: Arc<dyn EvidenceStore>,
    queue: Arc<dyn JobQueue>,
}

impl Producer {
    pub fn new(store: Arc<dyn EvidenceStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Enqueue one verification job. Jobs for the same evidence are not merged.
    pub async fn enqueue(&self, evidence_id: i64) -> Result<JobId, QueueError> {
        let job = VerificationJob::new(evidence_id);
        let job_id = self.queue.enqueue(VERIFY_JOB_NAME, job.to_payload()).await?;
        info!(evidence_id, job_id, queue = %self.queue.name(), "Queued verification");
        Ok(job_id)
    }

    /// Create free-text evidence and queue it
    pub async fn submit_text(
        &self,
        claim_id: i64,
        source: &str,
        excerpt: &str,
    ) -> Result<Submission, ProducerError> {
        let source = source.trim();
        let excerpt = excerpt.trim();
        if source.is_empty() || excerpt.is_empty() {
            return Err(ProducerError::Invalid("source and excerpt are required".to_string()));
        }

        self.submit(NewEvidence::text(claim_id, source, excerpt)).await
    }

    /// Create evidence from a stored document's extracted text and queue it
    pub async fn submit_document(
        &self,
        claim_id: i64,
        file_name: &str,
        extracted_text: &str,
        file_path: &str,
    ) -> Result<Submission, ProducerError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(ProducerError::Invalid("file name is required".to_string()));
        }

        let evidence = NewEvidence::text(claim_id, file_name, document_excerpt(extracted_text))
            .with_file_path(file_path);
        self.submit(evidence).await
    }

    /// Queue another verification of existing evidence
    pub async fn request_reverify(&self, evidence_id: i64) -> Result<JobId, ProducerError> {
        if self.store.get_by_id(evidence_id).await?.is_none() {
            return Err(ProducerError::NotFound(evidence_id));
        }
        Ok(self.enqueue(evidence_id).await?)
    }

    /// Delete evidence. Jobs already queued for it become no-ops.
    pub async fn delete(&self, evidence_id: i64) -> Result<(), ProducerError> {
        if !self.store.delete(evidence_id).await? {
            return Err(ProducerError::NotFound(evidence_id));
        }
        info!(evidence_id, "Deleted evidence");
        Ok(())
    }

    async fn submit(&self, evidence: NewEvidence) -> Result<Submission, ProducerError> {
        let evidence = self.store.insert(evidence).await?;
        let job_id = self.enqueue(evidence.id).await?;
        Ok(Submission { evidence, job_id })
    }
}

/// Collapse whitespace and keep the first `DOCUMENT_EXCERPT_CHARS` characters
pub fn document_excerpt(extracted_text: &str) -> String {
    let collapsed = extracted_text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return EMPTY_DOCUMENT_EXCERPT.to_string();
    }
    collapsed.chars().take(DOCUMENT_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EvidenceStatus;
    use crate::queue::{JobState, MemoryQueue};
    use crate::store::MemoryEvidenceStore;

    fn producer() -> (Producer, Arc<MemoryEvidenceStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryEvidenceStore::new());
        let queue = Arc::new(MemoryQueue::default());
        (Producer::new(store.clone(), queue.clone()), store, queue)
    }

    #[tokio::test]
    async fn test_submit_text_enqueues_job() {
        let (producer, store, queue) = producer();

        let submission = producer
            .submit_text(1, "  Journal of X ", " some excerpt ")
            .await
            .unwrap();
        assert_eq!(submission.evidence.source, "Journal of X");
        assert_eq!(submission.evidence.excerpt, "some excerpt");
        assert_eq!(submission.evidence.status, EvidenceStatus::Pending);
        assert!(store.get_by_id(submission.evidence.id).await.unwrap().is_some());

        let waiting = queue.jobs(JobState::Waiting, 10).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].name, "verify");
        assert_eq!(waiting[0].payload["evidenceId"], submission.evidence.id);
    }

    #[tokio::test]
    async fn test_submit_text_requires_content() {
        let (producer, store, queue) = producer();

        let err = producer.submit_text(1, "source", "   ").await.unwrap_err();
        assert!(matches!(err, ProducerError::Invalid(_)));
        assert!(store.is_empty().await);
        assert_eq!(queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_reverify_requires_existing_evidence() {
        let (producer, _store, queue) = producer();

        let err = producer.request_reverify(5).await.unwrap_err();
        assert!(matches!(err, ProducerError::NotFound(5)));

        let submission = producer.submit_text(1, "s", "e").await.unwrap();
        producer.request_reverify(submission.evidence.id).await.unwrap();
        // No deduplication: creation and re-verify are two jobs
        assert_eq!(queue.stats().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_submit_document() {
        let (producer, _store, _queue) = producer();

        let text = format!("Title\n\n  page   one\t{}", "w ".repeat(1000));
        let submission = producer
            .submit_document(2, "paper.pdf", &text, "1700000000-paper.pdf")
            .await
            .unwrap();

        let evidence = submission.evidence;
        assert_eq!(evidence.source, "paper.pdf");
        assert_eq!(evidence.file_path.as_deref(), Some("1700000000-paper.pdf"));
        assert!(evidence.excerpt.starts_with("Title page one w w"));
        assert_eq!(evidence.excerpt.chars().count(), DOCUMENT_EXCERPT_CHARS);
    }

    #[test]
    fn test_document_excerpt_placeholder() {
        assert_eq!(document_excerpt(" \n\t "), EMPTY_DOCUMENT_EXCERPT);
        assert_eq!(document_excerpt("a\n\nb"), "a b");
    }

    #[tokio::test]
    async fn test_delete() {
        let (producer, store, _queue) = producer();
        let submission = producer.submit_text(1, "s", "e").await.unwrap();

        producer.delete(submission.evidence.id).await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(
            producer.delete(submission.evidence.id).await,
            Err(ProducerError::NotFound(_))
        ));
    }
}
