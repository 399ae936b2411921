//! Attempt budget and the retry / dead-letter decision.
//!
//! The decision is planned from a snapshot of the record, then committed by a
//! conditional store update (`MailStore::increment_attempts`). When the store
//! refuses the increment, the budget was consumed concurrently and the
//! orchestrator dead-letters instead, so the store has the final word.

use serde::{Deserialize, Serialize};

use super::model::MailStatus;
use super::validation::OutputRejection;

/// Attempt budget for worker output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A budget of zero is treated as one: the first rejection dead-letters.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do with a rejected result for a record at `attempts`.
    ///
    /// The rejection that would make `attempts + 1` reach the budget dead-letters,
    /// so a record never carries more than `max_attempts` attempts.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts.saturating_add(1) >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry {
                next_attempts: attempts + 1,
            }
        }
    }

    /// Human-readable reason stored on a dead-lettered record.
    pub fn exhausted_reason(&self, rejection: &OutputRejection) -> String {
        format!("max attempts reached ({}): {rejection}", self.max_attempts)
    }
}

/// Planned action for a rejected result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Increment attempts and re-publish the task.
    Retry { next_attempts: u32 },
    /// Mark the record failed and publish to the dead-letter channel.
    DeadLetter,
}

/// What handling a worker callback did. Every variant is a successful handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlingOutcome {
    /// Result stored and published to the output channel.
    Accepted,
    /// Result rejected; task re-published with the new attempt count.
    Retried { attempts: u32 },
    /// Result rejected and budget exhausted; record failed and dead-lettered.
    DeadLettered { attempts: u32, reason: String },
    /// Record was already settled; nothing was written or published.
    AlreadySettled { status: MailStatus },
}

impl HandlingOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Retried { .. } => "retried",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::AlreadySettled { .. } => "already_settled",
        }
    }
}
