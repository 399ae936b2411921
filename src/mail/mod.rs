//! Mail pipeline — records, message shapes, validation, retry policy, and
//! the orchestrator that ties them to the store and the publisher.

pub mod messages;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod validation;

pub use model::{AssistantResponse, ClassificationResult, IncomingMail, Mail, MailStatus};
pub use orchestrator::MailOrchestrator;
pub use retry::{HandlingOutcome, RetryPolicy};
