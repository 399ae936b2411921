//! Admission checks and worker-output acceptance checks.
//!
//! Both are traits so stricter policies can be plugged into the orchestrator
//! without touching it. The defaults only check presence:
//! - [`RequiredFields`]: input text, sender and recipient must be non-empty
//! - [`Structural`]: classification non-empty, model answer present and non-null

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::model::{ClassificationResult, IncomingMail};

// ── Admission ───────────────────────────────────────────────────────

/// Precondition check applied to a mail before it is persisted.
///
/// The returned message becomes the body of a validation error.
pub trait AdmissionValidator: Send + Sync {
    fn check(&self, mail: &IncomingMail) -> Result<(), String>;
}

/// Rejects empty input text, sender or recipient. No format checking, and
/// whitespace-only values count as present.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFields;

impl AdmissionValidator for RequiredFields {
    fn check(&self, mail: &IncomingMail) -> Result<(), String> {
        if mail.input.is_empty() {
            return Err("input is empty".into());
        }
        if mail.from.is_empty() || mail.to.is_empty() {
            return Err("from/to must be set".into());
        }
        Ok(())
    }
}

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@<>]+@[^\s@<>]+\.[^\s@<>]+$").expect("address pattern compiles")
});

/// [`RequiredFields`] plus a loose `local@domain.tld` shape check on both addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFormat;

impl AdmissionValidator for AddressFormat {
    fn check(&self, mail: &IncomingMail) -> Result<(), String> {
        RequiredFields.check(mail)?;
        for (field, value) in [("from", &mail.from), ("to", &mail.to)] {
            if !ADDRESS_RE.is_match(value.trim()) {
                return Err(format!("{field} is not a valid address: {value}"));
            }
        }
        Ok(())
    }
}

// ── Worker output ───────────────────────────────────────────────────

/// Why a worker's output was not accepted.
///
/// This is an input to the retry decision, not an error of the callback itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRejection {
    EmptyClassification,
    EmptyModelAnswer,
    UnknownLabel(String),
}

impl fmt::Display for OutputRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyClassification => f.write_str("empty classification"),
            Self::EmptyModelAnswer => f.write_str("empty model_answer"),
            Self::UnknownLabel(label) => write!(f, "unknown classification '{label}'"),
        }
    }
}

/// Acceptance check applied to a worker's classification callback.
pub trait OutputValidator: Send + Sync {
    fn check(&self, result: &ClassificationResult) -> Result<(), OutputRejection>;
}

/// Shallow presence check. Does not look inside the model answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Structural;

impl OutputValidator for Structural {
    fn check(&self, result: &ClassificationResult) -> Result<(), OutputRejection> {
        check_structure(&result.classification, result.model_answer.as_ref())
    }
}

/// Pure structural check over a classification and a model answer.
pub fn check_structure(
    classification: &str,
    model_answer: Option<&serde_json::Value>,
) -> Result<(), OutputRejection> {
    if classification.trim().is_empty() {
        return Err(OutputRejection::EmptyClassification);
    }
    match model_answer {
        None | Some(serde_json::Value::Null) => Err(OutputRejection::EmptyModelAnswer),
        Some(_) => Ok(()),
    }
}

/// Wraps another validator and also requires the label to be in a fixed set.
pub struct AllowedLabels<V> {
    inner: V,
    labels: HashSet<String>,
}

impl<V: OutputValidator> AllowedLabels<V> {
    pub fn new<I, S>(inner: V, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

impl<V: OutputValidator> OutputValidator for AllowedLabels<V> {
    fn check(&self, result: &ClassificationResult) -> Result<(), OutputRejection> {
        self.inner.check(result)?;
        if !self.labels.contains(result.classification.trim()) {
            return Err(OutputRejection::UnknownLabel(result.classification.clone()));
        }
        Ok(())
    }
}
