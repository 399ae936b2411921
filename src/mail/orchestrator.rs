//! Processing orchestrator — admission, result handling, and operator flows.
//!
//! The orchestrator holds no per-mail state. Every decision is committed by a
//! guarded store operation, and every store or publish call is bounded by
//! `PipelineConfig::call_timeout`.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{DeadLetterMessage, ResultMessage, TaskMessage};
use super::model::{AssistantResponse, ClassificationResult, IncomingMail, Mail};
use super::retry::{HandlingOutcome, RetryDecision, RetryPolicy};
use super::validation::{
    AdmissionValidator, OutputRejection, OutputValidator, RequiredFields, Structural,
};
use crate::config::PipelineConfig;
use crate::error::{DatabaseError, ErrorKind, MailError};
use crate::publish::{self, Publisher};
use crate::store::MailStore;

/// Drives mail records through admission, validation, retry, and dead-lettering.
pub struct MailOrchestrator {
    store: Arc<dyn MailStore>,
    publisher: Arc<dyn Publisher>,
    config: PipelineConfig,
    policy: RetryPolicy,
    admission: Arc<dyn AdmissionValidator>,
    output: Arc<dyn OutputValidator>,
}

impl MailOrchestrator {
    pub fn new(
        store: Arc<dyn MailStore>,
        publisher: Arc<dyn Publisher>,
        config: PipelineConfig,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_attempts);
        Self {
            store,
            publisher,
            config,
            policy,
            admission: Arc::new(RequiredFields),
            output: Arc::new(Structural),
        }
    }

    /// Replace the admission check (default: [`RequiredFields`]).
    pub fn with_admission_validator(mut self, validator: impl AdmissionValidator + 'static) -> Self {
        self.admission = Arc::new(validator);
        self
    }

    /// Replace the worker-output check (default: [`Structural`]).
    pub fn with_output_validator(mut self, validator: impl OutputValidator + 'static) -> Self {
        self.output = Arc::new(validator);
        self
    }

    // ── Admission ───────────────────────────────────────────────────

    /// Persist a new mail and queue its classification task.
    ///
    /// The record is stored before the task is published. If publishing fails
    /// the record stays `new` with no task in flight and the error is returned.
    pub async fn submit(&self, incoming: IncomingMail) -> Result<Mail, MailError> {
        let id = incoming
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = self.admit(&id, incoming).await;
        log_failure("submit", &id, &result);
        result
    }

    async fn admit(&self, id: &str, incoming: IncomingMail) -> Result<Mail, MailError> {
        self.admission
            .check(&incoming)
            .map_err(MailError::Validation)?;

        let received_at = incoming.received_at.unwrap_or_else(Utc::now);
        let mail = Mail::new(id, incoming.input, incoming.from, incoming.to, received_at);

        match self.bounded("store.create", self.store.create_mail(&mail)).await {
            Err(MailError::Database(DatabaseError::Constraint(_))) => {
                return Err(MailError::Duplicate { id: id.to_string() });
            }
            other => other?,
        }

        self.publish(&self.config.channels.input, id, &TaskMessage::from(&mail))
            .await?;

        info!(mail_id = %id, "Mail queued for classification");
        Ok(mail)
    }

    // ── Worker callbacks ────────────────────────────────────────────

    /// Handle a worker's classification callback.
    ///
    /// A rejected result is not an error: it is retried or dead-lettered and
    /// reported through the returned [`HandlingOutcome`].
    pub async fn validate_result(
        &self,
        result: ClassificationResult,
    ) -> Result<HandlingOutcome, MailError> {
        let id = result.id.trim().to_string();
        let outcome = self.handle_result(&id, &result).await;
        match &outcome {
            Ok(handled) => debug!(mail_id = %id, outcome = handled.label(), "Callback handled"),
            Err(_) => log_failure("validate_result", &id, &outcome),
        }
        outcome
    }

    async fn handle_result(
        &self,
        id: &str,
        result: &ClassificationResult,
    ) -> Result<HandlingOutcome, MailError> {
        if id.is_empty() {
            return Err(MailError::Validation("id is empty".into()));
        }

        match self.output.check(result) {
            Ok(()) => self.accept(id, result).await,
            Err(rejection) => {
                warn!(mail_id = %id, %rejection, "Worker output rejected");
                self.reject(id, result, rejection).await
            }
        }
    }

    async fn accept(
        &self,
        id: &str,
        result: &ClassificationResult,
    ) -> Result<HandlingOutcome, MailError> {
        let model_answer = result
            .model_answer
            .clone()
            .unwrap_or(serde_json::Value::Null);

        let saved = self
            .bounded(
                "store.save_result",
                self.store
                    .save_result(id, &result.classification, &model_answer),
            )
            .await?;
        if !saved {
            return self.already_settled(id).await;
        }

        let message = ResultMessage {
            id: id.to_string(),
            classification: result.classification.clone(),
            model_answer,
        };
        self.publish(&self.config.channels.output, id, &message)
            .await?;

        info!(mail_id = %id, classification = %result.classification, "Result accepted");
        Ok(HandlingOutcome::Accepted)
    }

    async fn reject(
        &self,
        id: &str,
        result: &ClassificationResult,
        rejection: OutputRejection,
    ) -> Result<HandlingOutcome, MailError> {
        let mail = self.load(id).await?;
        if mail.status.is_terminal() {
            warn!(mail_id = %id, status = %mail.status, "Callback for settled mail ignored");
            return Ok(HandlingOutcome::AlreadySettled {
                status: mail.status,
            });
        }

        if let RetryDecision::Retry { next_attempts } = self.policy.decide(mail.attempts) {
            let incremented = self
                .bounded(
                    "store.increment_attempts",
                    self.store
                        .increment_attempts(id, self.policy.max_attempts()),
                )
                .await?;

            match incremented {
                Some(attempts) => {
                    if attempts != next_attempts {
                        debug!(
                            mail_id = %id,
                            planned = next_attempts,
                            attempts,
                            "Attempt count moved since snapshot"
                        );
                    }
                    self.publish(&self.config.channels.input, id, &TaskMessage::from(&mail))
                        .await?;
                    info!(
                        mail_id = %id,
                        attempts,
                        max_attempts = self.policy.max_attempts(),
                        "Task re-queued for retry"
                    );
                    return Ok(HandlingOutcome::Retried { attempts });
                }
                None => {
                    debug!(mail_id = %id, "Attempt budget consumed concurrently");
                }
            }
        }

        self.dead_letter(id, result, &rejection).await
    }

    async fn dead_letter(
        &self,
        id: &str,
        result: &ClassificationResult,
        rejection: &OutputRejection,
    ) -> Result<HandlingOutcome, MailError> {
        let reason = self.policy.exhausted_reason(rejection);
        let marked = self
            .bounded("store.mark_failed", self.store.mark_failed(id, &reason))
            .await?;
        let Some(attempts) = marked else {
            return self.already_settled(id).await;
        };

        let payload = match serde_json::to_value(result) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(mail_id = %id, error = %e, "Dead-letter payload could not be serialized; sending without it");
                None
            }
        };
        let message = DeadLetterMessage {
            id: id.to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
            payload,
        };
        self.publish(&self.config.channels.dead_letter, id, &message)
            .await?;

        info!(
            mail_id = %id,
            attempts,
            max_attempts = self.policy.max_attempts(),
            reason = %reason,
            "Mail sent to dead-letter channel"
        );
        Ok(HandlingOutcome::DeadLettered { attempts, reason })
    }

    async fn already_settled(&self, id: &str) -> Result<HandlingOutcome, MailError> {
        let mail = self.load(id).await?;
        warn!(mail_id = %id, status = %mail.status, "Callback for settled mail ignored");
        Ok(HandlingOutcome::AlreadySettled {
            status: mail.status,
        })
    }

    // ── Operator flows ──────────────────────────────────────────────

    /// All processed records, most recently updated first.
    pub async fn list_processed(&self) -> Result<Vec<Mail>, MailError> {
        let result = self
            .bounded("store.list_processed", self.store.list_processed())
            .await;
        if let Err(e) = &result {
            error!(error = %e, "list_processed failed");
        }
        result
    }

    pub async fn get(&self, id: &str) -> Result<Mail, MailError> {
        let result = match non_empty_id(id) {
            Ok(id) => self.load(id).await,
            Err(e) => Err(e),
        };
        log_failure("get", id, &result);
        result
    }

    /// Set the approval flag. Approving twice is not an error.
    pub async fn approve(&self, id: &str) -> Result<(), MailError> {
        let result = match non_empty_id(id) {
            Ok(id) => self
                .bounded("store.set_approved", self.store.set_approved(id))
                .await
                .inspect(|_| info!(mail_id = %id, "Mail approved")),
            Err(e) => Err(e),
        };
        log_failure("approve", id, &result);
        result
    }

    /// Store an operator response. With `mark_processed` the record moves to
    /// `processed` from any status, without touching attempts or results.
    pub async fn attach_response(
        &self,
        id: &str,
        response: AssistantResponse,
    ) -> Result<Mail, MailError> {
        let result = match non_empty_id(id) {
            Ok(id) => self.store_response(id, response).await,
            Err(e) => Err(e),
        };
        log_failure("attach_response", id, &result);
        result
    }

    async fn store_response(
        &self,
        id: &str,
        response: AssistantResponse,
    ) -> Result<Mail, MailError> {
        self.bounded(
            "store.save_assistant_response",
            self.store
                .save_assistant_response(id, &response.response, response.mark_processed),
        )
        .await?;

        let mail = self.load(id).await?;
        info!(
            mail_id = %id,
            mark_processed = response.mark_processed,
            status = %mail.status,
            "Assistant response attached"
        );
        Ok(mail)
    }

    // ── Plumbing ────────────────────────────────────────────────────

    async fn load(&self, id: &str) -> Result<Mail, MailError> {
        self.bounded("store.get", self.store.get_mail(id))
            .await?
            .ok_or_else(|| MailError::NotFound { id: id.to_string() })
    }

    async fn publish<T: Serialize>(
        &self,
        channel: &str,
        key: &str,
        message: &T,
    ) -> Result<(), MailError> {
        let payload = publish::encode(channel, message)?;
        self.bounded("publish", self.publisher.send(channel, key, &payload))
            .await
    }

    /// Run a store or publish call under the configured deadline.
    async fn bounded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, MailError>
    where
        F: Future<Output = Result<T, E>>,
        MailError: From<E>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(MailError::from),
            Err(_) => Err(MailError::Timeout {
                operation,
                timeout: self.config.call_timeout,
            }),
        }
    }
}

fn non_empty_id(id: &str) -> Result<&str, MailError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(MailError::Validation("id is empty".into()));
    }
    Ok(id)
}

fn log_failure<T>(operation: &str, id: &str, result: &Result<T, MailError>) {
    let Err(e) = result else {
        return;
    };
    match e.kind() {
        ErrorKind::Validation | ErrorKind::NotFound => {
            warn!(mail_id = %id, operation, error = %e, "Mail operation rejected");
        }
        ErrorKind::Technical => {
            error!(mail_id = %id, operation, error = %e, "Mail operation failed");
        }
    }
}
