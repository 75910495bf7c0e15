//! Worker metrics.
//!
//! `worker_jobs_total{result}` counts jobs that reached a verdict. Failed
//! deliveries are tracked by the queue, not here.

pub mod exporter;

use prometheus::{IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};

pub use exporter::{export_metrics, metrics_router, serve_metrics};

/// Outcome label of a processed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Verified,
    Rejected,
}

impl Outcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

/// Counters shared by every consumer in the process
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    jobs_total: IntCounterVec,
}

impl WorkerMetrics {
    /// Create the counters on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the counters on an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let jobs_total = IntCounterVec::new(
            Opts::new("worker_jobs_total", "jobs processed"),
            &["result"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
        })
    }

    /// Also expose process CPU, memory and file descriptor metrics
    pub fn with_process_metrics(self) -> Result<Self, prometheus::Error> {
        #[cfg(target_os = "linux")]
        self.registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;
        Ok(self)
    }

    /// Count one processed job
    pub fn record_outcome(&self, outcome: Outcome) {
        self.jobs_total.with_label_values(&[outcome.as_label()]).inc();
    }

    /// Current value of one outcome counter
    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.jobs_total.with_label_values(&[outcome.as_label()]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for WorkerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerMetrics")
            .field("verified", &self.outcome_count(Outcome::Verified))
            .field("rejected", &self.outcome_count(Outcome::Rejected))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome() {
        let metrics = WorkerMetrics::new().unwrap();
        metrics.record_outcome(Outcome::Verified);
        metrics.record_outcome(Outcome::Verified);
        metrics.record_outcome(Outcome::Rejected);

        assert_eq!(metrics.outcome_count(Outcome::Verified), 2);
        assert_eq!(metrics.outcome_count(Outcome::Rejected), 1);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = WorkerMetrics::new().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_outcome(Outcome::Rejected);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.outcome_count(Outcome::Rejected), 800);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        WorkerMetrics::with_registry(registry.clone()).unwrap();
        assert!(WorkerMetrics::with_registry(registry).is_err());
    }
}
