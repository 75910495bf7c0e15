//! Core verification logic.
//!
//! This module contains:
//! - Scorer: Keyword heuristic and verdict threshold
//! - Worker: Job handler driving the evidence state machine
//! - Producer: Evidence submission and job enqueueing
//! - Runner: Process wiring for the worker

pub mod producer;
pub mod runner;
pub mod scorer;
pub mod worker;

// Re-export commonly used types
pub use producer::{document_excerpt, Producer, ProducerError, Submission};
pub use runner::{run_worker, Services, WorkerOverrides};
pub use scorer::{score_evidence, Verdict, SCORE_MAX, SCORE_MIN, VERIFY_THRESHOLD};
pub use worker::{JobError, JobOutcome, VerificationWorker};
