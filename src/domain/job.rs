//! Verification job payload.
//!
//! The queue carries raw JSON; attempt count, enqueue time and job id belong
//! to the queue. This type is only the application-level payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job name every verification request is enqueued under
pub const VERIFY_JOB_NAME: &str = "verify";

/// A request to (re-)evaluate one evidence record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJob {
    pub evidence_id: i64,
}

impl VerificationJob {
    pub fn new(evidence_id: i64) -> Self {
        Self { evidence_id }
    }

    /// Serialize to the wire payload (`{"evidenceId": 42}`)
    pub fn to_payload(&self) -> Value {
        serde_json::json!({ "evidenceId": self.evidence_id })
    }

    /// Parse a queue payload.
    ///
    /// Accepts an integer or an integer-valued string for `evidenceId`;
    /// anything else is a malformed job.
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        let raw = payload
            .get("evidenceId")
            .ok_or_else(|| "missing evidenceId".to_string())?;

        let evidence_id = match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .ok_or_else(|| format!("bad evidenceId: {}", raw))?;

        Ok(Self { evidence_id })
    }
}
