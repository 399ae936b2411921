//! HTTP surface — Axum routes over the mail orchestrator.

pub mod routes;

pub use routes::{AppState, mail_routes};
