//! Mail record and the request shapes that enter the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a mail record.
///
/// `New` is the only non-terminal state. The automatic pipeline moves a record
/// to `Processed` (accepted result) or `Failed` (attempt budget exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailStatus {
    New,
    Processed,
    Failed,
}

impl MailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::New)
    }
}

impl fmt::Display for MailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown mail status '{other}'")),
        }
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// A persisted mail record.
///
/// Owned by the store. Callers get copies; mutations go through store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub id: String,
    pub input: String,
    pub from: String,
    pub to: String,
    pub received_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: MailStatus,
    pub classification: Option<String>,
    pub model_answer: Option<serde_json::Value>,
    pub assistant_response: Option<serde_json::Value>,
    pub is_approved: bool,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mail {
    /// Build a fresh record in its initial state (`attempts = 0`, `status = new`).
    pub fn new(
        id: impl Into<String>,
        input: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            input: input.into(),
            from: from.into(),
            to: to.into(),
            received_at,
            attempts: 0,
            status: MailStatus::New,
            classification: None,
            model_answer: None,
            assistant_response: None,
            is_approved: false,
            failed_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// A mail item submitted for classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomingMail {
    /// Caller-assigned id. A UUID is generated when absent or blank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub input: String,
    pub from: String,
    pub to: String,
    /// Defaults to the admission time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// A worker's classification callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: String,
    #[serde(default)]
    pub classification: String,
    /// Opaque model output. JSON `null` and a missing field both deserialize to `None`.
    #[serde(default)]
    pub model_answer: Option<serde_json::Value>,
}

/// Operator-supplied response attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub response: serde_json::Value,
    /// Also move the record to `processed`, regardless of pipeline state.
    #[serde(default)]
    pub mark_processed: bool,
}
