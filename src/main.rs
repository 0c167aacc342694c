//! Maysa Dispatch - delivery worker for the Maysa shopping platform
//!
//! Connects to NATS and serves the dispatch surface: pricing, driver
//! matching, the delivery lifecycle, batching and live tracking.

mod cli;
mod config;
mod defaults;
mod error;
mod handlers;
mod services;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::store::{DocumentStore, LiveStore, MemoryDocumentStore, MemoryLiveStore};
use crate::types::Priority;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Quote {
            distance_km,
            weight_kg,
            priority,
            window_cost,
        }) => {
            return run_quote(distance_km, weight_kg, &priority, window_cost);
        }
        Some(Command::Serve) | None => {}
    }

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "dispatch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,maysa_dispatch=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        ) // file
        .init();

    info!("Starting Maysa dispatch worker...");

    // Load configuration
    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    // Backing stores; durable backends plug in behind the same traits
    let docs: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let live: Arc<dyn LiveStore> = Arc::new(MemoryLiveStore::new());
    info!("Stores initialized");

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    // Start message handlers
    let handler_result = handlers::start_handlers(nats_client, docs, live, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

fn run_quote(distance_km: f64, weight_kg: f64, priority: &str, window_cost: f64) -> Result<()> {
    let priority = match priority {
        "normal" => Priority::Normal,
        "express" => Priority::Express,
        "urgent" => Priority::Urgent,
        other => anyhow::bail!("unknown priority '{other}', expected normal, express or urgent"),
    };
    let config = config::Config::from_env()?;
    let breakdown = services::pricing::quote(distance_km, weight_kg, window_cost, priority);
    println!("{}", serde_json::to_string_pretty(&breakdown)?);
    println!("total: {:.2} {}", breakdown.total, config.currency);
    Ok(())
}
