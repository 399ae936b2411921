//! Mailflow — mail classification pipeline orchestrator.

pub mod api;
pub mod config;
pub mod error;
pub mod mail;
pub mod publish;
pub mod store;
