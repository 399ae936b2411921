//! Integration tests for the mail HTTP surface.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! libSQL store and an in-memory publisher, then drives the REST contract
//! with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use mailflow::api::mail_routes;
use mailflow::config::PipelineConfig;
use mailflow::mail::MailOrchestrator;
use mailflow::mail::messages::TaskMessage;
use mailflow::publish::MemoryPublisher;
use mailflow::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return (base url, publisher).
async fn start_server(max_attempts: u32) -> (String, Arc<MemoryPublisher>) {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let publisher = MemoryPublisher::new();
    let config = PipelineConfig {
        max_attempts,
        ..PipelineConfig::default()
    };
    let orchestrator = Arc::new(MailOrchestrator::new(store, publisher.clone(), config));
    let app = mail_routes(orchestrator);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), publisher)
}

fn mail_body(id: &str) -> Value {
    json!({
        "id": id,
        "input": "Quarterly numbers attached, please review before Friday.",
        "from": "carol@example.com",
        "to": "dave@example.com"
    })
}

async fn submit(client: &reqwest::Client, base: &str, id: &str) {
    let resp = client
        .post(format!("{base}/process"))
        .json(&mail_body(id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

async fn callback(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{base}/validate_processed_message"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server(3).await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_queues_task() {
    timeout(TEST_TIMEOUT, async {
        let (base, publisher) = start_server(3).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/process"))
            .json(&mail_body("m-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], "m-1");
        assert_eq!(body["status"], "queued");

        let tasks = publisher.on_channel("mail-input").await;
        assert_eq!(tasks.len(), 1);
        let task: TaskMessage = tasks[0].json().unwrap();
        assert_eq!(task.from, "carol@example.com");

        let mail: Value = reqwest::get(format!("{base}/api/mails/m-1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mail["status"], "new");
        assert_eq!(mail["attempts"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_rejects_bad_input() {
    timeout(TEST_TIMEOUT, async {
        let (base, publisher) = start_server(3).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/process"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid json body");

        let resp = client
            .post(format!("{base}/process"))
            .json(&json!({"input": "", "from": "a@x.com", "to": "b@x.com"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        assert!(publisher.published().await.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_process_is_conflict() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server(3).await;
        let client = reqwest::Client::new();
        submit(&client, &base, "m-1").await;

        let resp = client
            .post(format!("{base}/process"))
            .json(&mail_body("m-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn retry_then_dead_letter_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, publisher) = start_server(3).await;
        let client = reqwest::Client::new();
        submit(&client, &base, "m-1").await;

        let bad = json!({"id": "m-1", "classification": "", "model_answer": {}});
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let resp = callback(&client, &base, bad.clone()).await;
            assert_eq!(resp.status(), 200);
            let body: Value = resp.json().await.unwrap();
            outcomes.push(body["outcome"]["outcome"].as_str().unwrap().to_string());
        }
        assert_eq!(outcomes, vec!["retried", "retried", "dead_lettered"]);

        let mail: Value = reqwest::get(format!("{base}/api/mails/m-1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mail["status"], "failed");
        assert_eq!(mail["attempts"], 2);
        assert_eq!(publisher.on_channel("mail-dead-letter").await.len(), 1);
        assert_eq!(publisher.on_channel("mail-input").await.len(), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn accepted_result_is_listed() {
    timeout(TEST_TIMEOUT, async {
        let (base, publisher) = start_server(3).await;
        let client = reqwest::Client::new();
        submit(&client, &base, "m-1").await;
        submit(&client, &base, "m-2").await;

        for id in ["m-1", "m-2"] {
            let resp = callback(
                &client,
                &base,
                json!({"id": id, "classification": "important", "model_answer": {"score": 0.8}}),
            )
            .await;
            assert_eq!(resp.status(), 200);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["id"], id);
            assert_eq!(body["outcome"]["outcome"], "accepted");
        }

        let processed: Vec<Value> = reqwest::get(format!("{base}/api/mails/processed"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0]["id"], "m-2");
        assert_eq!(processed[0]["classification"], "important");
        assert_eq!(publisher.on_channel("mail-output").await.len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn callback_errors_map_to_status_codes() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server(3).await;
        let client = reqwest::Client::new();

        let resp = callback(
            &client,
            &base,
            json!({"id": "", "classification": "spam", "model_answer": {}}),
        )
        .await;
        assert_eq!(resp.status(), 400);

        let resp = callback(
            &client,
            &base,
            json!({"id": "ghost", "classification": "", "model_answer": null}),
        )
        .await;
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn approve_and_attach_response() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server(3).await;
        let client = reqwest::Client::new();
        submit(&client, &base, "m-1").await;

        for _ in 0..2 {
            let resp = client
                .post(format!("{base}/api/mails/m-1/approve"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["is_approved"], true);
        }

        let resp = client
            .post(format!("{base}/api/mails/m-1/response"))
            .json(&json!({"response": {"text": "Reviewed, looks good."}, "mark_processed": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], "m-1");
        assert_eq!(body["status"], "processed");

        let mail: Value = reqwest::get(format!("{base}/api/mails/m-1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mail["is_approved"], true);
        assert_eq!(mail["assistant_response"]["text"], "Reviewed, looks good.");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn operator_routes_on_unknown_id_are_404() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server(3).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/mails/ghost/approve"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("{base}/api/mails/ghost/response"))
            .json(&json!({"response": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = reqwest::get(format!("{base}/api/mails/ghost")).await.unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("ghost"));
    })
    .await
    .expect("test timed out");
}
