//! agent: joins upstream live-chat rooms on command and republishes parsed
//! events onto the bus. See `src/pipeline.rs` for the handshake/action/event
//! loop state machine.

use std::sync::Arc;
use std::time::Duration;

use agent::admin;
use agent::chat_client::{ChatClient, NullChatClient};
use agent::config::AgentConfig;
use agent::pipeline::{self, AppState};
use bus_core::BusHelper;
use clap::Parser;
use metrics_core::MetricsRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = AgentConfig::parse();
    info!(agent_id = %cfg.agent_id, prefix = %cfg.prefix, "agent starting");

    let bus = match BusHelper::connect(&cfg.bus_url).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "failed to connect to bus");
            std::process::exit(1);
        }
    };

    let metrics = match MetricsRegistry::new() {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to build metrics registry");
            std::process::exit(1);
        }
    };

    // No concrete upstream transport is wired in yet; a real `ChatClient`
    // plugs in here without touching the rest of the pipeline.
    let chat: Arc<dyn ChatClient> = Arc::new(NullChatClient);

    let state = Arc::new(AppState::new(cfg.clone(), bus, chat.clone(), metrics.clone()));
    state.indexer.spawn_sweepers(Duration::from_secs(60));

    if let Err(e) = pipeline::run_handshake(&state).await {
        error!(error = %e, "handshake failed");
        std::process::exit(1);
    }
    info!(agent_id = %cfg.agent_id, "handshake complete, entering steady state");

    let shutdown = CancellationToken::new();
    let frames = chat.frames();

    let action_task = tokio::spawn(pipeline::run_action_loop(state.clone(), shutdown.clone()));
    let event_task = tokio::spawn(pipeline::run_event_loop(state.clone(), frames, shutdown.clone()));
    let status_task = tokio::spawn(pipeline::run_status_ticker(state.clone(), shutdown.clone()));

    let admin_router = admin::build_router(metrics.clone());
    let admin_listener = match tokio::net::TcpListener::bind(&cfg.admin_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cfg.admin_bind, "failed to bind admin listener");
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.admin_bind, "admin http surface listening");
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(async move { admin_shutdown.cancelled().await })
            .await
            .ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    let _ = tokio::join!(action_task, event_task, status_task);
}
