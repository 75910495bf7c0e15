//! Consume loop: reserve, run the handler, acknowledge or fail.
//!
//! Retry and dead-lettering are decided by the queue in `fail`; handlers
//! never retry on their own. A handler error or timeout only affects that
//! job, the loop keeps going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{Delivery, FailOutcome, JobId, JobQueue, QueueError};

/// Processes one delivery
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Result of a successful job, logged by the consumer
    type Output: std::fmt::Debug + Send;

    /// Failure reported to the queue
    type Error: std::fmt::Display + Send;

    async fn handle(&self, delivery: &Delivery) -> Result<Self::Output, Self::Error>;
}

/// Consumer timing
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// A handler running longer than this fails the attempt
    pub job_timeout: Duration,

    /// How long to wait for new work when the queue is empty
    pub poll_interval: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Result of one `process_next` call
#[derive(Debug)]
pub enum Processed<O> {
    /// Nothing was ready
    Idle,

    /// Handler succeeded and the job was acknowledged
    Completed { job_id: JobId, output: O },

    /// Handler failed or timed out; the queue decided what happens next
    Failed {
        job_id: JobId,
        error: String,
        outcome: FailOutcome,
    },
}

/// Drives one handler against one queue
pub struct Consumer<H> {
    queue: Arc<dyn JobQueue>,
    handler: Arc<H>,
    options: ConsumerOptions,
    id: String,
}

impl<H: JobHandler> Consumer<H> {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<H>, options: ConsumerOptions) -> Self {
        Self {
            queue,
            handler,
            options,
            id: "consumer-0".to_string(),
        }
    }

    /// Name used in logs
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Reserve and process at most one job
    pub async fn process_next(&self) -> Result<Processed<H::Output>, QueueError> {
        let Some(delivery) = self.queue.reserve().await? else {
            return Ok(Processed::Idle);
        };

        debug!(
            consumer = %self.id,
            job_id = delivery.id,
            attempt = delivery.attempt,
            "Delivered job"
        );

        let started = Instant::now();
        let result =
            tokio::time::timeout(self.options.job_timeout, self.handler.handle(&delivery)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(Ok(output)) => {
                self.queue.complete(&delivery).await?;
                debug!(consumer = %self.id, job_id = delivery.id, duration_ms, ?output, "Job completed");
                return Ok(Processed::Completed {
                    job_id: delivery.id,
                    output,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.options.job_timeout.as_millis()),
        };

        let outcome = self.queue.fail(&delivery, &error).await?;
        match &outcome {
            FailOutcome::Retrying { attempt, delay } => warn!(
                consumer = %self.id,
                job_id = delivery.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Job failed, retrying"
            ),
            FailOutcome::DeadLettered { attempts } => error!(
                consumer = %self.id,
                job_id = delivery.id,
                attempts,
                error = %error,
                "Job failed permanently"
            ),
        }

        Ok(Processed::Failed {
            job_id: delivery.id,
            error,
            outcome,
        })
    }

    /// Process jobs until nothing is ready. Returns how many were delivered.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut delivered = 0;
        while !matches!(self.process_next().await?, Processed::Idle) {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Consume until `shutdown` turns true.
    ///
    /// Shutdown is only observed between jobs: an in-flight job always runs
    /// to completion or failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.id, queue = %self.queue.name(), "Consumer started");

        while !*shutdown.borrow() {
            let idle = match self.process_next().await {
                Ok(Processed::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    // Backend trouble: back off and keep the loop alive
                    error!(consumer = %self.id, error = %e, "Queue operation failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = self.queue.wait_for_job(self.options.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!(consumer = %self.id, "Consumer stopped");
    }
}
