//! `MailStore` trait — async persistence contract for mail records.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::mail::model::Mail;

/// Durable keyed storage for mail records.
///
/// Every mutating operation refreshes `updated_at`. Operations on an unknown
/// id return `DatabaseError::NotFound` unless documented otherwise.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Insert a new record. A duplicate id is `DatabaseError::Constraint`.
    async fn create_mail(&self, mail: &Mail) -> Result<(), DatabaseError>;

    /// Get a record by id.
    async fn get_mail(&self, id: &str) -> Result<Option<Mail>, DatabaseError>;

    /// Atomically increment `attempts` if the record is `new` and
    /// `attempts + 1 < max_attempts`.
    ///
    /// Returns the new count, or `None` when the guard refused the increment
    /// (budget exhausted or record already settled).
    async fn increment_attempts(
        &self,
        id: &str,
        max_attempts: u32,
    ) -> Result<Option<u32>, DatabaseError>;

    /// Move a `new` record to `failed` with a reason.
    ///
    /// Returns the record's final attempt count, or `None` if it was already settled.
    async fn mark_failed(&self, id: &str, reason: &str) -> Result<Option<u32>, DatabaseError>;

    /// Store an accepted result and move the record to `processed`.
    ///
    /// Writes only while no classification is stored and the record has never
    /// failed, even if an operator later forced it to `processed`. Returns
    /// `false` if the guard refused the write.
    async fn save_result(
        &self,
        id: &str,
        classification: &str,
        model_answer: &serde_json::Value,
    ) -> Result<bool, DatabaseError>;

    /// All `processed` records, most recently updated first.
    async fn list_processed(&self) -> Result<Vec<Mail>, DatabaseError>;

    /// Set `is_approved`. Idempotent.
    async fn set_approved(&self, id: &str) -> Result<(), DatabaseError>;

    /// Store an operator response, optionally forcing `status = processed`.
    async fn save_assistant_response(
        &self,
        id: &str,
        response: &serde_json::Value,
        mark_processed: bool,
    ) -> Result<(), DatabaseError>;
}
