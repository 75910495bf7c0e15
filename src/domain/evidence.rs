//! Evidence records and their verification status.
//!
//! An Evidence is created `Pending` by the API layer. From then on only the
//! verification worker changes its status, score and reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of supporting material for a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Unique identifier (assigned by the store)
    pub id: i64,

    /// Owning claim
    pub claim_id: i64,

    /// Where the evidence comes from (title, citation, file name)
    pub source: String,

    /// Text excerpt subject to scoring
    pub excerpt: String,

    /// Reference to an externally stored document, opaque to the pipeline
    pub file_path: Option<String>,

    /// Current verification status
    pub status: EvidenceStatus,

    /// Confidence score, set at the first terminal transition
    pub score: Option<i32>,

    /// Explanation of the last verdict, cleared while running
    pub reason: Option<String>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new evidence record. Always stored as `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvidence {
    pub claim_id: i64,
    pub source: String,
    pub excerpt: String,
    pub file_path: Option<String>,
}

impl NewEvidence {
    /// Text evidence without a backing document
    pub fn text(claim_id: i64, source: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            claim_id,
            source: source.into(),
            excerpt: excerpt.into(),
            file_path: None,
        }
    }

    /// Attach a stored document reference
    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }
}

/// Partial update applied by the worker.
///
/// `None` leaves a field untouched. `reason: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceUpdate {
    pub status: Option<EvidenceStatus>,
    pub score: Option<i32>,
    pub reason: Option<Option<String>>,
}

impl EvidenceUpdate {
    /// Enter `Running` and clear the previous reason (score is kept)
    pub fn running() -> Self {
        Self {
            status: Some(EvidenceStatus::Running),
            score: None,
            reason: Some(None),
        }
    }

    /// Record a terminal verdict
    pub fn verdict(status: EvidenceStatus, score: i32, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            score: Some(score),
            reason: Some(Some(reason.into())),
        }
    }

    /// Apply the update to a record in place
    pub fn apply_to(&self, evidence: &mut Evidence) {
        if let Some(status) = self.status {
            evidence.status = status;
        }
        if let Some(score) = self.score {
            evidence.score = Some(score);
        }
        if let Some(ref reason) = self.reason {
            evidence.reason = reason.clone();
        }
    }
}

/// Verification status of an evidence record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    /// Created, not yet picked up by a worker
    Pending,

    /// A worker is scoring it
    Running,

    /// Score reached the verification threshold
    Verified,

    /// Score stayed below the threshold
    Rejected,
}

impl EvidenceStatus {
    /// Stable string form used in storage and output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Verified or rejected. Still superseded by a later verification job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Rejected)
    }
}

impl Default for EvidenceStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for EvidenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EvidenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "VERIFIED" => Ok(Self::Verified),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown evidence status: {}", other)),
        }
    }
}
