//! Configuration types.
//!
//! Everything here is read once at startup and handed to the components that
//! need it. Nothing reads the environment after bootstrap.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Logical publish destinations used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    /// Tasks for the classification worker.
    pub input: String,
    /// Accepted classification results.
    pub output: String,
    /// Mail that exhausted its attempt budget.
    pub dead_letter: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            input: "mail-input".to_string(),
            output: "mail-output".to_string(),
            dead_letter: "mail-dead-letter".to_string(),
        }
    }
}

/// Pipeline configuration injected into the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempt budget per mail. A record never accumulates more attempts than this.
    pub max_attempts: u32,
    pub channels: ChannelNames,
    /// Deadline applied to every store and publish call.
    pub call_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            channels: ChannelNames::default(),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// REST broker proxy settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub timeout: Duration,
}

/// Process-level configuration for the `mailflow` binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    /// Directory for rolling log files. Console-only logging when unset.
    pub log_dir: Option<PathBuf>,
    /// `None` selects the in-memory publisher.
    pub broker: Option<BrokerConfig>,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineConfig::default();

        let max_attempts: u32 = parse_or(&lookup, "MAILFLOW_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILFLOW_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let channels = ChannelNames {
            input: channel_name(&lookup, "MAILFLOW_INPUT_CHANNEL", defaults.channels.input)?,
            output: channel_name(&lookup, "MAILFLOW_OUTPUT_CHANNEL", defaults.channels.output)?,
            dead_letter: channel_name(
                &lookup,
                "MAILFLOW_DEAD_LETTER_CHANNEL",
                defaults.channels.dead_letter,
            )?,
        };

        let call_timeout_ms: u64 = parse_or(
            &lookup,
            "MAILFLOW_CALL_TIMEOUT_MS",
            defaults.call_timeout.as_millis() as u64,
        )?;

        let broker = match lookup("MAILFLOW_BROKER_URL").filter(|s| !s.trim().is_empty()) {
            Some(url) => {
                let timeout_ms: u64 = parse_or(&lookup, "MAILFLOW_BROKER_TIMEOUT_MS", 10_000)?;
                let username = lookup("MAILFLOW_BROKER_USERNAME").filter(|s| !s.is_empty());
                let password = lookup("MAILFLOW_BROKER_PASSWORD")
                    .filter(|s| !s.is_empty())
                    .map(SecretString::from);
                if password.is_some() && username.is_none() {
                    return Err(ConfigError::MissingEnvVar(
                        "MAILFLOW_BROKER_USERNAME".to_string(),
                    ));
                }
                Some(BrokerConfig {
                    url: url.trim().trim_end_matches('/').to_string(),
                    username,
                    password,
                    timeout: Duration::from_millis(timeout_ms),
                })
            }
            None => None,
        };

        Ok(Self {
            bind_addr: lookup("MAILFLOW_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            db_path: lookup("MAILFLOW_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/mailflow.db")),
            log_dir: lookup("MAILFLOW_LOG_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            broker,
            pipeline: PipelineConfig {
                max_attempts,
                channels,
                call_timeout: Duration::from_millis(call_timeout_ms),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn channel_name<F>(lookup: &F, key: &str, default: String) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "channel name must not be empty".to_string(),
        }),
        Some(raw) => Ok(raw.trim().to_string()),
        None => Ok(default),
    }
}
