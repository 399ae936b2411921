//! libSQL backend — async `MailStore` implementation.
//!
//! Supports local file and in-memory databases. Attempt and status changes
//! are single conditional `UPDATE` statements so concurrent callbacks for the
//! same id cannot lose an increment or settle a record twice.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::mail::model::{Mail, MailStatus};
use crate::store::migrations;
use crate::store::traits::MailStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Status of a record, or `None` if it does not exist.
    async fn current_status(&self, id: &str) -> Result<Option<MailStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status FROM mails WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("current_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("current_status row parse: {e}")))?;
                Ok(Some(parse_status(&status)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("current_status: {e}"))),
        }
    }

    /// Resolve a refused conditional update: `NotFound` if the id is unknown.
    async fn ensure_exists(&self, id: &str) -> Result<(), DatabaseError> {
        match self.current_status(id).await? {
            Some(_) => Ok(()),
            None => Err(not_found(id)),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that lexical order in SQL equals time order.
/// Nanosecond precision keeps stored timestamps identical to the in-memory ones.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn now_str() -> String {
    format_datetime(&Utc::now())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_status(s: &str) -> Result<MailStatus, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

fn parse_json(column: &str, raw: Option<String>) -> Result<Option<serde_json::Value>, DatabaseError> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
    })
    .transpose()
}

fn to_json_text(column: &str, value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn not_found(id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "mail".to_string(),
        id: id.to_string(),
    }
}

/// Map a libsql Row to a Mail. Column order matches MAIL_COLUMNS.
fn row_to_mail(row: &libsql::Row) -> Result<Mail, DatabaseError> {
    let field = |e: libsql::Error| DatabaseError::Query(format!("mail row parse: {e}"));

    let received_str: String = row.get(4).map_err(field)?;
    let attempts: i64 = row.get(5).map_err(field)?;
    let status_str: String = row.get(6).map_err(field)?;
    let is_approved: i64 = row.get(10).map_err(field)?;
    let created_str: String = row.get(12).map_err(field)?;
    let updated_str: String = row.get(13).map_err(field)?;

    Ok(Mail {
        id: row.get(0).map_err(field)?,
        input: row.get(1).map_err(field)?,
        from: row.get(2).map_err(field)?,
        to: row.get(3).map_err(field)?,
        received_at: parse_datetime(&received_str),
        attempts: u32::try_from(attempts)
            .map_err(|_| DatabaseError::Serialization(format!("attempts out of range: {attempts}")))?,
        status: parse_status(&status_str)?,
        classification: row.get::<String>(7).ok(),
        model_answer: parse_json("model_answer", row.get::<String>(8).ok())?,
        assistant_response: parse_json("assistant_response", row.get::<String>(9).ok())?,
        is_approved: is_approved != 0,
        failed_reason: row.get::<String>(11).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MAIL_COLUMNS: &str = "id, input, from_email, to_email, received_at, attempts, status, classification, model_answer, assistant_response, is_approved, failed_reason, created_at, updated_at";

#[async_trait]
impl MailStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    async fn create_mail(&self, mail: &Mail) -> Result<(), DatabaseError> {
        let now = now_str();
        self.conn()
            .execute(
                "INSERT INTO mails (id, input, from_email, to_email, received_at, attempts, status,
                    is_approved, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
                params![
                    mail.id.as_str(),
                    mail.input.as_str(),
                    mail.from.as_str(),
                    mail.to.as_str(),
                    format_datetime(&mail.received_at),
                    i64::from(mail.attempts),
                    mail.status.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint failed") {
                    DatabaseError::Constraint(format!("mail {} already exists", mail.id))
                } else {
                    DatabaseError::Query(format!("create_mail: {msg}"))
                }
            })?;

        debug!(mail_id = %mail.id, "Mail inserted into DB");
        Ok(())
    }

    async fn get_mail(&self, id: &str) -> Result<Option<Mail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAIL_COLUMNS} FROM mails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mail: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_mail(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_mail: {e}"))),
        }
    }

    async fn increment_attempts(
        &self,
        id: &str,
        max_attempts: u32,
    ) -> Result<Option<u32>, DatabaseError> {
        let incremented: Option<i64> = {
            let mut rows = self
                .conn()
                .query(
                    "UPDATE mails SET attempts = attempts + 1, updated_at = ?1
                     WHERE id = ?2 AND status = 'new' AND attempts + 1 < ?3
                     RETURNING attempts",
                    params![now_str(), id, i64::from(max_attempts)],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("increment_attempts: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => Some(row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("increment_attempts row parse: {e}"))
                })?),
                Ok(None) => None,
                Err(e) => return Err(DatabaseError::Query(format!("increment_attempts: {e}"))),
            }
        };

        match incremented {
            Some(attempts) => {
                debug!(mail_id = %id, attempts, "Attempts incremented in DB");
                u32::try_from(attempts).map(Some).map_err(|_| {
                    DatabaseError::Serialization(format!("attempts out of range: {attempts}"))
                })
            }
            None => {
                self.ensure_exists(id).await?;
                debug!(mail_id = %id, max_attempts, "Attempt increment refused");
                Ok(None)
            }
        }
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<Option<u32>, DatabaseError> {
        let failed_attempts: Option<i64> = {
            let mut rows = self
                .conn()
                .query(
                    "UPDATE mails SET status = 'failed', failed_reason = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'new'
                     RETURNING attempts",
                    params![reason, now_str(), id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("mark_failed: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => Some(row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("mark_failed row parse: {e}"))
                })?),
                Ok(None) => None,
                Err(e) => return Err(DatabaseError::Query(format!("mark_failed: {e}"))),
            }
        };

        match failed_attempts {
            Some(attempts) => {
                debug!(mail_id = %id, attempts, "Mail marked failed in DB");
                u32::try_from(attempts).map(Some).map_err(|_| {
                    DatabaseError::Serialization(format!("attempts out of range: {attempts}"))
                })
            }
            None => {
                self.ensure_exists(id).await?;
                Ok(None)
            }
        }
    }

    async fn save_result(
        &self,
        id: &str,
        classification: &str,
        model_answer: &serde_json::Value,
    ) -> Result<bool, DatabaseError> {
        let answer = to_json_text("model_answer", model_answer)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE mails SET classification = ?1, model_answer = ?2, status = 'processed',
                    updated_at = ?3
                 WHERE id = ?4 AND classification IS NULL AND failed_reason IS NULL
                    AND status != 'failed'",
                params![classification, answer, now_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_result: {e}")))?;

        if changed == 0 {
            self.ensure_exists(id).await?;
            return Ok(false);
        }
        debug!(mail_id = %id, classification, "Result saved in DB");
        Ok(true)
    }

    async fn list_processed(&self) -> Result<Vec<Mail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MAIL_COLUMNS} FROM mails WHERE status = 'processed'
                     ORDER BY updated_at DESC, rowid DESC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_processed: {e}")))?;

        let mut mails = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => mails.push(row_to_mail(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_processed: {e}"))),
            }
        }
        Ok(mails)
    }

    async fn set_approved(&self, id: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE mails SET is_approved = 1, updated_at = ?1 WHERE id = ?2",
                params![now_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_approved: {e}")))?;

        if changed == 0 {
            return Err(not_found(id));
        }
        debug!(mail_id = %id, "Mail approved in DB");
        Ok(())
    }

    async fn save_assistant_response(
        &self,
        id: &str,
        response: &serde_json::Value,
        mark_processed: bool,
    ) -> Result<(), DatabaseError> {
        let response = to_json_text("assistant_response", response)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE mails SET assistant_response = ?1,
                    status = CASE WHEN ?2 = 1 THEN 'processed' ELSE status END,
                    updated_at = ?3
                 WHERE id = ?4",
                params![response, i64::from(mark_processed), now_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_assistant_response: {e}")))?;

        if changed == 0 {
            return Err(not_found(id));
        }
        debug!(mail_id = %id, mark_processed, "Assistant response saved in DB");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
