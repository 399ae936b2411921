//! Kafka REST proxy publisher.
//!
//! Each message becomes a single-record produce request:
//! `POST {url}/topics/{channel}` with body `{"records":[{"key":..,"value":..}]}`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use super::Publisher;
use crate::config::BrokerConfig;
use crate::error::{ConfigError, PublishError};

const KAFKA_JSON_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

/// Longest broker error body kept in a `PublishError::Rejected`.
const MAX_ERROR_BODY: usize = 512;

pub struct RestProxyPublisher {
    base_url: String,
    credentials: Option<(String, SecretString)>,
    client: reqwest::Client,
}

impl RestProxyPublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "MAILFLOW_BROKER_URL".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            (Some(user), None) => Some((user.clone(), SecretString::from(String::new()))),
            _ => None,
        };

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    fn topic_url(&self, channel: &str) -> String {
        format!("{}/topics/{channel}", self.base_url)
    }
}

#[async_trait]
impl Publisher for RestProxyPublisher {
    async fn send(&self, channel: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| PublishError::Encode {
                channel: channel.to_string(),
                reason: format!("payload is not JSON: {e}"),
            })?;
        let body = serde_json::json!({
            "records": [{ "key": key, "value": value }]
        });
        let body = serde_json::to_vec(&body).map_err(|e| PublishError::Encode {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        let mut request = self
            .client
            .post(self.topic_url(channel))
            .header(CONTENT_TYPE, KAFKA_JSON_CONTENT_TYPE)
            .body(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass.expose_secret()));
        }

        let resp = request.send().await.map_err(|e| PublishError::SendFailed {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let mut text = resp.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            warn!(channel, key, status = status.as_u16(), "Broker rejected record");
            return Err(PublishError::Rejected {
                channel: channel.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(channel, key, "Record published to broker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
    };
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Debug, Clone)]
    struct Captured {
        topic: String,
        content_type: Option<String>,
        authorization: Option<String>,
        body: serde_json::Value,
    }

    type Log = Arc<Mutex<Vec<Captured>>>;

    async fn produce(
        State(log): State<Log>,
        Path(topic): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        log.lock().unwrap().push(Captured {
            topic: topic.clone(),
            content_type: header("content-type"),
            authorization: header("authorization"),
            body,
        });
        if topic == "broken" {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    async fn start_broker() -> (String, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/topics/{topic}", post(produce))
            .with_state(Arc::clone(&log));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://127.0.0.1:{port}"), log)
    }

    fn broker_config(url: &str) -> BrokerConfig {
        BrokerConfig {
            url: url.to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn posts_single_record_to_topic() {
        let (url, log) = start_broker().await;
        let publisher = RestProxyPublisher::new(&broker_config(&url)).unwrap();

        publisher
            .send("mail-input", "m-1", br#"{"id":"m-1","input":"hi"}"#)
            .await
            .unwrap();

        let captured = log.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].topic, "mail-input");
        assert_eq!(captured[0].content_type.as_deref(), Some(KAFKA_JSON_CONTENT_TYPE));
        assert!(captured[0].authorization.is_none());
        assert_eq!(captured[0].body["records"][0]["key"], "m-1");
        assert_eq!(captured[0].body["records"][0]["value"]["input"], "hi");
    }

    #[tokio::test]
    async fn sends_basic_auth_when_configured() {
        let (url, log) = start_broker().await;
        let mut config = broker_config(&format!("{url}/"));
        config.username = Some("svc".into());
        config.password = Some(SecretString::from("s3cret".to_string()));
        let publisher = RestProxyPublisher::new(&config).unwrap();

        publisher.send("mail-output", "m-1", b"{}").await.unwrap();

        let captured = log.lock().unwrap().clone();
        let auth = captured[0].authorization.clone().unwrap();
        assert!(auth.starts_with("Basic "));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (url, _log) = start_broker().await;
        let publisher = RestProxyPublisher::new(&broker_config(&url)).unwrap();

        let err = publisher.send("broken", "m-1", b"{}").await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn non_json_payload_is_encode_error() {
        let (url, log) = start_broker().await;
        let publisher = RestProxyPublisher::new(&broker_config(&url)).unwrap();

        let err = publisher.send("mail-input", "m-1", b"not json").await.unwrap_err();
        assert!(matches!(err, PublishError::Encode { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_broker_is_send_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let publisher =
            RestProxyPublisher::new(&broker_config(&format!("http://127.0.0.1:{port}"))).unwrap();
        let err = publisher.send("mail-input", "m-1", b"{}").await.unwrap_err();
        assert!(matches!(err, PublishError::SendFailed { .. }));
    }
}
