use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mailflow::api::mail_routes;
use mailflow::config::ServerConfig;
use mailflow::mail::MailOrchestrator;
use mailflow::publish::{MemoryPublisher, Publisher, RestProxyPublisher};
use mailflow::store::{LibSqlBackend, MailStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Held for the life of the process so buffered file logs are flushed.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Mailflow starting");

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn MailStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Publisher ────────────────────────────────────────────────────────
    let publisher: Arc<dyn Publisher> = match &config.broker {
        Some(broker) => {
            tracing::info!(url = %broker.url, "Publishing through broker REST proxy");
            Arc::new(RestProxyPublisher::new(broker).context("failed to set up broker client")?)
        }
        None => {
            tracing::warn!("MAILFLOW_BROKER_URL not set; messages are only logged");
            let memory = MemoryPublisher::broadcast_only();
            spawn_publish_logger(&memory);
            memory
        }
    };

    let pipeline = config.pipeline.clone();
    tracing::info!(
        max_attempts = pipeline.max_attempts,
        input = %pipeline.channels.input,
        output = %pipeline.channels.output,
        dead_letter = %pipeline.channels.dead_letter,
        "Pipeline configured"
    );
    let orchestrator = Arc::new(MailOrchestrator::new(store, publisher, pipeline));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = mail_routes(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Mailflow stopped");
    Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mailflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Log every in-memory publish so a broker-less run is still observable.
fn spawn_publish_logger(publisher: &MemoryPublisher) {
    let mut rx = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => tracing::info!(
                    channel = %msg.channel,
                    mail_id = %msg.key,
                    bytes = msg.payload.len(),
                    "Message published"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Publish logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
