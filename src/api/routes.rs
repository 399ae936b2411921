//! REST endpoints for mail admission, worker callbacks, and operator actions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{ErrorKind, MailError};
use crate::mail::{AssistantResponse, ClassificationResult, IncomingMail, MailOrchestrator};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MailOrchestrator>,
}

/// Build the Axum router with all mail routes.
pub fn mail_routes(orchestrator: Arc<MailOrchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/process", post(process))
        .route("/validate_processed_message", post(validate_processed_message))
        .route("/api/mails/processed", get(list_processed))
        .route("/api/mails/{id}", get(get_mail))
        .route("/api/mails/{id}/approve", post(approve_mail))
        .route("/api/mails/{id}/response", post(attach_response))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Pipeline ────────────────────────────────────────────────────────────

async fn process(
    State(state): State<AppState>,
    body: Result<Json<IncomingMail>, JsonRejection>,
) -> Response {
    let Json(incoming) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json("/process", rejection),
    };

    match state.orchestrator.submit(incoming).await {
        Ok(mail) => (
            StatusCode::ACCEPTED,
            Json(json!({"id": mail.id, "status": "queued"})),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn validate_processed_message(
    State(state): State<AppState>,
    body: Result<Json<ClassificationResult>, JsonRejection>,
) -> Response {
    let Json(result) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json("/validate_processed_message", rejection),
    };

    let id = result.id.clone();
    match state.orchestrator.validate_result(result).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"id": id, "outcome": outcome})),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Operator ────────────────────────────────────────────────────────────

async fn list_processed(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_processed().await {
        Ok(mails) => Json(mails).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_mail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.get(&id).await {
        Ok(mail) => Json(mail).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn approve_mail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.approve(&id).await {
        Ok(()) => Json(json!({"id": id, "is_approved": true})).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn attach_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AssistantResponse>, JsonRejection>,
) -> Response {
    let Json(response) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json("/api/mails/{id}/response", rejection),
    };

    match state.orchestrator.attach_response(&id, response).await {
        Ok(mail) => Json(json!({"id": mail.id, "status": mail.status})).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

fn bad_json(path: &str, rejection: JsonRejection) -> Response {
    warn!(path, error = %rejection.body_text(), "Invalid JSON body");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid json body"})),
    )
        .into_response()
}

/// Map a pipeline error to a status code. Technical details stay in the logs.
fn error_response(err: &MailError) -> Response {
    let (status, message) = match (err, err.kind()) {
        (MailError::Duplicate { .. }, _) => (StatusCode::CONFLICT, err.to_string()),
        (_, ErrorKind::Validation) => (StatusCode::BAD_REQUEST, err.to_string()),
        (_, ErrorKind::NotFound) => (StatusCode::NOT_FOUND, err.to_string()),
        (_, ErrorKind::Technical) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        ),
    };
    (status, Json(json!({"error": message}))).into_response()
}
