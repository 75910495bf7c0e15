//! Domain types for the verification pipeline.
//!
//! This module contains the core data structures:
//! - Evidence: the record being verified and its status machine
//! - VerificationJob: the payload carried by the queue

pub mod evidence;
pub mod job;

// Re-export commonly used types
pub use evidence::{Evidence, EvidenceStatus, EvidenceUpdate, NewEvidence};
pub use job::{VerificationJob, VERIFY_JOB_NAME};
