//! # voxlined: voxline daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Parse configuration (`voxline.toml`, env vars)
//! - Initialize the `SQLite` connection pool and run migrations
//! - Load the template and macro catalogs
//! - Construct the orchestrator, injecting repositories and the realtime
//!   channel via port traits
//! - Repair commands interrupted by a previous run
//! - Start the scheduler, drain and retention loops
//! - Build the axum router and serve until SIGINT
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod catalog;
mod config;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voxline_adapter_http_axum::state::AppState;
use voxline_adapter_realtime_ws::{ChannelStatus, RealtimeChannel};
use voxline_adapter_storage_sqlite_sqlx::{
    Config as StorageConfig, SqliteCommandRepository, SqliteQueueRepository,
    SqliteScheduleRepository,
};
use voxline_app::background::{spawn_on_change, spawn_periodic};
use voxline_app::event_bus::CommandEventBus;
use voxline_app::ports::{NoIntentBackend, StaticCredential, SystemClock};
use voxline_app::registry::{MacroRegistry, TemplateRegistry};
use voxline_app::services::macro_engine::MacroEngine;
use voxline_app::services::offline_queue::OfflineQueue;
use voxline_app::services::orchestrator::{Collaborators, Orchestrator};
use voxline_app::services::scheduler::Scheduler;
use voxline_app::services::template_matcher::TemplateMatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Database
    let db = StorageConfig {
        database_url: config.database.url.clone(),
    }
    .build()
    .await?;
    let pool = db.pool().clone();

    // Catalogs
    let templates = Arc::new(TemplateRegistry::new());
    if let Some(dir) = &config.matcher.templates_dir {
        catalog::load_templates(dir, &templates);
    }
    let macros = Arc::new(MacroRegistry::new());
    if let Some(dir) = &config.macros.dir {
        catalog::load_macros(dir, &macros);
    }

    // Event bus & realtime channel
    let event_bus = Arc::new(CommandEventBus::new(256));
    let credentials = Arc::new(StaticCredential::new(config.realtime.token.clone()));
    let channel = RealtimeChannel::new(&config.realtime.channel, credentials);

    // Orchestrator
    let orchestrator = Orchestrator::new(Collaborators {
        commands: SqliteCommandRepository::new(pool.clone()),
        queue: OfflineQueue::new(SqliteQueueRepository::new(pool.clone()), config.queue.max_retries),
        scheduler: Scheduler::new(
            SqliteScheduleRepository::new(pool),
            config.scheduler.poll_interval(),
        ),
        transport: channel.clone(),
        publisher: Arc::clone(&event_bus),
        intents: NoIntentBackend,
        matcher: TemplateMatcher::with_defaults(templates, config.matcher.workers)?,
        macros: MacroEngine::new(macros),
        clock: Arc::new(SystemClock),
    });

    let report = orchestrator.recover().await?;
    info!(recovered = report.total(), "startup recovery done");

    if let Err(err) = channel.connect().await {
        warn!(%err, url = %config.realtime.channel.url, "backend unreachable, commands will queue");
    }

    // Background loops
    let token = CancellationToken::new();
    let mut tasks = Vec::new();

    let scheduled = Arc::clone(&orchestrator);
    tasks.push(spawn_periodic(
        "scheduler",
        config.scheduler.poll_interval(),
        token.clone(),
        move || {
            let orchestrator = Arc::clone(&scheduled);
            async move {
                if let Err(err) = orchestrator.poll_schedules().await {
                    error!(%err, "schedule poll failed");
                }
            }
        },
    ));

    let drained = Arc::clone(&orchestrator);
    let drain_channel = channel.clone();
    tasks.push(spawn_periodic(
        "queue-drain",
        config.queue.drain_interval(),
        token.clone(),
        move || {
            let orchestrator = Arc::clone(&drained);
            let channel = drain_channel.clone();
            async move {
                if !channel.is_connected() {
                    channel.schedule_reconnect();
                    return;
                }
                if let Err(err) = orchestrator.drain_offline_queue().await {
                    error!(%err, "offline queue drain failed");
                }
            }
        },
    ));

    let reconnected = Arc::clone(&orchestrator);
    tasks.push(spawn_on_change(
        "drain-on-reconnect",
        channel.subscribe_status(),
        token.clone(),
        |status: &ChannelStatus| *status == ChannelStatus::Connected,
        move || {
            let orchestrator = Arc::clone(&reconnected);
            async move {
                if let Err(err) = orchestrator.drain_offline_queue().await {
                    error!(%err, "offline queue drain failed");
                }
            }
        },
    ));

    let swept = Arc::clone(&orchestrator);
    let retention_days = config.retention.days;
    tasks.push(spawn_periodic(
        "retention",
        config.retention.sweep_interval(),
        token.clone(),
        move || {
            let orchestrator = Arc::clone(&swept);
            async move {
                if let Err(err) = orchestrator.sweep_retention(retention_days).await {
                    error!(%err, "retention sweep failed");
                }
            }
        },
    ));

    // HTTP
    let state = AppState::new(Arc::clone(&orchestrator), Arc::clone(&event_bus));
    let app = voxline_adapter_http_axum::router::build(state);

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "voxlined listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    token.cancel();
    channel.shutdown();
    for task in tasks {
        if let Err(err) = task.await {
            warn!(%err, "background task ended abnormally");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
