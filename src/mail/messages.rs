//! Message shapes published to the task, output, and dead-letter channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::Mail;

/// Work item for the classification worker. Sent on admission and on every retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub input: String,
    pub from: String,
    pub to: String,
    pub received_at: DateTime<Utc>,
}

impl From<&Mail> for TaskMessage {
    fn from(mail: &Mail) -> Self {
        Self {
            id: mail.id.clone(),
            input: mail.input.clone(),
            from: mail.from.clone(),
            to: mail.to.clone(),
            received_at: mail.received_at,
        }
    }
}

/// An accepted classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: String,
    pub classification: String,
    pub model_answer: serde_json::Value,
}

/// Terminal failure record for a mail that exhausted its attempt budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// The rejected callback, when it could be serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_message_copies_mail_content() {
        let received = Utc::now();
        let mail = Mail::new("m-1", "body", "a@x.com", "b@x.com", received);
        let task = TaskMessage::from(&mail);
        assert_eq!(task.id, "m-1");
        assert_eq!(task.input, "body");
        assert_eq!(task.from, "a@x.com");
        assert_eq!(task.to, "b@x.com");
        assert_eq!(task.received_at, received);
    }

    #[test]
    fn dead_letter_omits_missing_payload() {
        let msg = DeadLetterMessage {
            id: "m-1".into(),
            reason: "max attempts reached (3): empty classification".into(),
            timestamp: Utc::now(),
            payload: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["id"], "m-1");
        assert!(json["timestamp"].is_string());
    }
}
