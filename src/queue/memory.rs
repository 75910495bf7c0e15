//! In-memory job queue.
//!
//! Same delivery semantics as the SQLite queue, without durability.
//! Consumers waiting for work are woken on enqueue.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Delivery, FailOutcome, JobId, JobQueue, JobRecord, JobState, QueueError, QueueOptions,
    QueueStats,
};

#[derive(Debug)]
struct Entry {
    name: String,
    payload: Value,
    state: JobState,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
    available_at: Instant,
    lease: Option<(Uuid, Instant)>,
    error: Option<String>,
}

impl Entry {
    fn to_record(&self, id: JobId, finished_at: Option<DateTime<Utc>>) -> JobRecord {
        JobRecord {
            id,
            name: self.name.clone(),
            payload: self.payload.clone(),
            state: self.state,
            attempts: self.attempts,
            enqueued_at: self.enqueued_at,
            finished_at,
            error: self.error.clone(),
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            JobState::Waiting => self.available_at <= now,
            JobState::Active => self.lease.map_or(true, |(_, until)| until <= now),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: JobId,
    /// Waiting and active jobs
    live: BTreeMap<JobId, Entry>,
    /// Newest at the front
    completed: VecDeque<JobRecord>,
    failed: VecDeque<JobRecord>,
}

impl Inner {
    fn take_owned(&mut self, delivery: &Delivery) -> Result<Entry, QueueError> {
        let owned = self.live.get(&delivery.id).is_some_and(|entry| {
            entry.state == JobState::Active
                && entry.lease.map(|(token, _)| token) == Some(delivery.lease_token)
        });
        if !owned {
            return Err(QueueError::LeaseLost(delivery.id));
        }
        self.live
            .remove(&delivery.id)
            .ok_or(QueueError::LeaseLost(delivery.id))
    }

    fn push_history(history: &mut VecDeque<JobRecord>, record: JobRecord, keep: usize) {
        history.push_front(record);
        history.truncate(keep);
    }
}

/// Queue held in process memory
#[derive(Debug)]
pub struct MemoryQueue {
    options: QueueOptions,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn enqueue(&self, name: &str, payload: Value) -> Result<JobId, QueueError> {
        let id = {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = inner.next_id;
            inner.live.insert(
                id,
                Entry {
                    name: name.to_string(),
                    payload,
                    state: JobState::Waiting,
                    attempts: 0,
                    enqueued_at: Utc::now(),
                    available_at: Instant::now(),
                    lease: None,
                    error: None,
                },
            );
            id
        };

        debug!(queue = %self.options.name, job_id = id, "Enqueued job");
        self.notify.notify_one();
        Ok(id)
    }

    async fn reserve(&self) -> Result<Option<Delivery>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        loop {
            // Oldest ready job first (best effort FIFO)
            let next = inner
                .live
                .iter()
                .filter(|(_, entry)| entry.is_ready(now))
                .min_by_key(|(id, entry)| (entry.available_at, **id))
                .map(|(id, entry)| (*id, entry.state));

            let Some((id, state)) = next else {
                return Ok(None);
            };

            if state == JobState::Active {
                // Lease expired: the previous consumer is presumed dead
                let exhausted = inner
                    .live
                    .get(&id)
                    .is_some_and(|entry| entry.attempts >= self.options.retry.max_attempts);
                if exhausted {
                    if let Some(mut entry) = inner.live.remove(&id) {
                        warn!(job_id = id, attempts = entry.attempts, "Lease expired on final attempt");
                        entry.state = JobState::Failed;
                        entry.lease = None;
                        entry.error = Some(format!("lease expired after {} attempts", entry.attempts));
                        let record = entry.to_record(id, Some(Utc::now()));
                        Inner::push_history(&mut inner.failed, record, self.options.keep_failed);
                    }
                    continue;
                }
                warn!(job_id = id, "Lease expired, redelivering");
            }

            let Some(entry) = inner.live.get_mut(&id) else {
                return Ok(None);
            };
            let token = Uuid::new_v4();
            entry.state = JobState::Active;
            entry.attempts += 1;
            entry.lease = Some((token, deadline(now, self.options.lease)));

            return Ok(Some(Delivery {
                id,
                name: entry.name.clone(),
                payload: entry.payload.clone(),
                attempt: entry.attempts,
                enqueued_at: entry.enqueued_at,
                lease_token: token,
            }));
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let mut entry = inner.take_owned(delivery)?;

        entry.state = JobState::Completed;
        entry.lease = None;
        entry.error = None;
        let record = entry.to_record(delivery.id, Some(Utc::now()));
        Inner::push_history(&mut inner.completed, record, self.options.keep_completed);

        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<FailOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut entry = inner.take_owned(delivery)?;
        entry.lease = None;
        entry.error = Some(error.to_string());

        let retry = &self.options.retry;
        if retry.should_retry(delivery.attempt) {
            let delay = retry.delay_for_attempt(delivery.attempt);
            entry.state = JobState::Waiting;
            entry.available_at = deadline(Instant::now(), delay);
            inner.live.insert(delivery.id, entry);
            drop(inner);

            self.notify.notify_one();
            return Ok(FailOutcome::Retrying {
                attempt: delivery.attempt,
                delay,
            });
        }

        entry.state = JobState::Failed;
        let record = entry.to_record(delivery.id, Some(Utc::now()));
        Inner::push_history(&mut inner.failed, record, self.options.keep_failed);

        Ok(FailOutcome::DeadLettered {
            attempts: delivery.attempt,
        })
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats {
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            ..Default::default()
        };
        for entry in inner.live.values() {
            match entry.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        let records = match state {
            JobState::Completed => inner.completed.iter().take(limit).cloned().collect(),
            JobState::Failed => inner.failed.iter().take(limit).cloned().collect(),
            live_state => inner
                .live
                .iter()
                .rev()
                .filter(|(_, entry)| entry.state == live_state)
                .take(limit)
                .map(|(id, entry)| entry.to_record(*id, None))
                .collect(),
        };
        Ok(records)
    }

    async fn wait_for_job(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

/// `now + after`, saturating at a far-future instant
fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RetryPolicy;
    use serde_json::json;

    fn create_test_queue(max_attempts: u32) -> MemoryQueue {
        MemoryQueue::new(QueueOptions {
            retry: RetryPolicy::immediate(max_attempts),
            keep_completed: 2,
            keep_failed: 2,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_enqueue_reserve_complete() {
        let queue = create_test_queue(3);
        let id = queue.enqueue("verify", json!({ "evidenceId": 1 })).await.unwrap();

        let delivery = queue.reserve().await.unwrap().unwrap();
        assert_eq!(delivery.id, id);
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.payload, json!({ "evidenceId": 1 }));

        // Leased job is not handed out twice
        assert!(queue.reserve().await.unwrap().is_none());

        queue.complete(&delivery).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = create_test_queue(3);
        for i in 0..3 {
            queue.enqueue("verify", json!({ "evidenceId": i })).await.unwrap();
        }
        for i in 0..3 {
            let delivery = queue.reserve().await.unwrap().unwrap();
            assert_eq!(delivery.payload["evidenceId"], i);
            queue.complete(&delivery).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_retry_then_dead_letter() {
        let queue = create_test_queue(2);
        queue.enqueue("verify", json!({})).await.unwrap();

        let first = queue.reserve().await.unwrap().unwrap();
        let outcome = queue.fail(&first, "boom").await.unwrap();
        assert_eq!(outcome, FailOutcome::Retrying { attempt: 1, delay: Duration::ZERO });

        let second = queue.reserve().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        let outcome = queue.fail(&second, "boom again").await.unwrap();
        assert_eq!(outcome, FailOutcome::DeadLettered { attempts: 2 });

        assert!(queue.reserve().await.unwrap().is_none());
        let failed = queue.jobs(JobState::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("boom again"));
        assert_eq!(failed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let queue = create_test_queue(1);
        for i in 0..5 {
            queue.enqueue("verify", json!({ "evidenceId": i })).await.unwrap();
            let delivery = queue.reserve().await.unwrap().unwrap();
            queue.complete(&delivery).await.unwrap();
        }

        let completed = queue.jobs(JobState::Completed, 10).await.unwrap();
        assert_eq!(completed.len(), 2);
        // Newest first
        assert_eq!(completed[0].payload["evidenceId"], 4);
    }

    #[tokio::test]
    async fn test_stale_lease_is_rejected() {
        let queue = MemoryQueue::new(QueueOptions {
            lease: Duration::ZERO,
            ..Default::default()
        });
        queue.enqueue("verify", json!({})).await.unwrap();

        let stale = queue.reserve().await.unwrap().unwrap();
        // Zero lease: immediately redeliverable to another consumer
        let fresh = queue.reserve().await.unwrap().unwrap();
        assert_eq!(fresh.id, stale.id);
        assert_eq!(fresh.attempt, 2);

        assert!(matches!(queue.complete(&stale).await, Err(QueueError::LeaseLost(_))));
        queue.complete(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_on_last_attempt_fails_job() {
        let queue = MemoryQueue::new(QueueOptions {
            retry: RetryPolicy::immediate(1),
            lease: Duration::ZERO,
            ..Default::default()
        });
        queue.enqueue("verify", json!({})).await.unwrap();

        let _crashed = queue.reserve().await.unwrap().unwrap();
        assert!(queue.reserve().await.unwrap().is_none());

        let failed = queue.jobs(JobState::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("lease expired"));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_idle_consumer() {
        let queue = MemoryQueue::default();

        let mut wait = tokio_test::task::spawn(queue.wait_for_job(Duration::from_secs(60)));
        tokio_test::assert_pending!(wait.poll());

        queue.enqueue("verify", json!({ "evidenceId": 1 })).await.unwrap();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn test_huge_lease_and_backoff_saturate() {
        let queue = MemoryQueue::new(QueueOptions {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay_ms: u64::MAX,
                max_delay_ms: u64::MAX,
                backoff_multiplier: 2.0,
            },
            lease: Duration::MAX,
            ..Default::default()
        });
        queue.enqueue("verify", json!({})).await.unwrap();

        let delivery = queue.reserve().await.unwrap().unwrap();
        assert!(queue.reserve().await.unwrap().is_none());

        let outcome = queue.fail(&delivery, "boom").await.unwrap();
        assert!(matches!(outcome, FailOutcome::Retrying { attempt: 1, .. }));
        assert!(queue.reserve().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().waiting, 1);
    }
}
