//! inbox-bridge: relays mailbox conversations into chat rooms.
//!
//! Mail fetchers store raw mail in the database; the bridge extracts the
//! individual messages, sorts mails into threads and hands new threads,
//! replies and room overviews to the chat relay behind the notification
//! webhook.

mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inbox_core::defaults::CONFIG_PATH;
use inbox_core::{AppConfig, NotificationSink};
use inbox_db::{Database, PoolConfig};
use inbox_inference::oracle_from_config;
use inbox_jobs::{Pipeline, PipelineDeps};

use crate::sink::{LogSink, WebhookSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "inbox_bridge=info,inbox_jobs=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "inbox_bridge=info,inbox_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("inbox-bridge.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config_path =
        PathBuf::from(std::env::var("INBOX_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string()));
    let config = AppConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    info!("Connecting to database...");
    let db = Database::connect_with_config(
        &config.database.url,
        PoolConfig::from_database_config(&config.database),
    )
    .await
    .context("failed to connect to database")?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await.context("failed to run migrations")?;
    info!("Database migrations complete");

    let oracle = oracle_from_config(&config.oracle)?;
    let sink: Arc<dyn NotificationSink> = match WebhookSink::from_config(&config.notify)? {
        Some(webhook) => Arc::new(webhook),
        None => {
            info!("No notification webhook configured, logging notifications only");
            Arc::new(LogSink::default())
        }
    };

    let poll_interval = config.extraction.poll_interval();
    let deps = PipelineDeps {
        mails: Arc::new(db.mails.clone()),
        threads: Arc::new(db.threads.clone()),
        rooms: Arc::new(db.rooms.clone()),
        oracle,
        sink,
    };
    let pipeline = Pipeline::new(config, deps);
    pipeline.start();

    // Mail left over from the previous run
    pipeline.enqueue_new_mail_batch();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    match poll_interval {
        Some(interval) => {
            info!(interval_secs = interval.as_secs(), "Polling for stored mail");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    result = &mut shutdown => {
                        result.context("failed to listen for shutdown signal")?;
                        break;
                    }
                    _ = ticker.tick() => {
                        pipeline.enqueue_new_mail_batch();
                    }
                }
            }
        }
        None => shutdown
            .await
            .context("failed to listen for shutdown signal")?,
    }

    info!("Shutdown signal received, stopping pipeline");
    pipeline.shutdown().await;
    Ok(())
}
