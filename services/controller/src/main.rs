//! controller: fleet manager and aggregation plane — converges agents onto
//! the configured watched-room set and de-duplicates their stream output
//! (spec §4.5, §4.6, §4.7).

use std::sync::Arc;

use bus_core::BusHelper;
use clap::Parser;
use controller::config::ControllerConfig;
use controller::dedup::AggregationWindow;
use controller::fleet::Fleet;
use controller::manager::{self, ManagerState};
use controller::rooms::RoomSet;
use controller::admin;
use metrics_core::MetricsRegistry;
use room_providers::{ApiProvider, ProviderSinks, RoomProvider, StaticProvider};
use tokio::sync::mpsc;
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

    let cfg = ControllerConfig::parse();
    info!(prefix = %cfg.prefix, "controller starting");

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

    let fleet = Arc::new(Fleet::new());
    let rooms = Arc::new(RoomSet::new());
    let shutdown = CancellationToken::new();

    let (provide_tx, provide_rx) = mpsc::channel(256);
    let (revoke_tx, revoke_rx) = mpsc::channel(256);
    let sinks = ProviderSinks { provide: provide_tx, revoke: revoke_tx };

    let mut providers: Vec<Box<dyn RoomProvider>> = Vec::new();
    if !cfg.static_rooms.is_empty() {
        providers.push(Box::new(StaticProvider::new(cfg.static_rooms.clone())));
    }
    if let Some(path) = &cfg.api_provider_path {
        providers.push(Box::new(ApiProvider::new(path.clone())));
    }

    let mut provider_routes = Vec::new();
    for provider in &mut providers {
        if let Err(e) = provider.init().await {
            error!(provider = provider.name(), error = %e, "room provider init failed");
            std::process::exit(1);
        }
        if let Some(routes) = provider.routes(sinks.clone()) {
            provider_routes.push(routes);
        }
    }
    for provider in providers {
        let sinks = sinks.clone();
        tokio::spawn(async move { provider.provide(&sinks).await });
    }

    let rooms_task = tokio::spawn(Arc::clone(&rooms).run(provide_rx, revoke_rx, shutdown.clone()));

    let manager_state = Arc::new(ManagerState {
        cfg: cfg.clone(),
        bus: bus.clone(),
        fleet: Arc::clone(&fleet),
        rooms: Arc::clone(&rooms),
        metrics: metrics.clone(),
    });
    let pump_task = tokio::spawn(manager::run_message_pump(manager_state.clone(), shutdown.clone()));
    let init_task = tokio::spawn(manager::run_init_loop(manager_state.clone(), shutdown.clone()));
    let sync_task = tokio::spawn(manager::run_sync_loop(manager_state.clone(), shutdown.clone()));
    let status_task = tokio::spawn(manager::run_status_loop(manager_state.clone(), shutdown.clone()));

    let aggregation = Arc::new(AggregationWindow::new(cfg.clone(), bus.clone(), Arc::clone(&fleet), metrics.clone()));
    let dedup_task = tokio::spawn(aggregation.run(shutdown.clone()));

    let admin_router = admin::build_router(metrics.clone(), provider_routes);
    let admin_listener = match tokio::net::TcpListener::bind(&cfg.admin_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cfg.admin_bind, "failed to bind admin listener");
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.admin_bind, "admin http surface listening");
    let admin_shutdown = shutdown.clone();
    let admin_task = tokio::spawn(async move {
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
    let _ = tokio::join!(
        rooms_task, pump_task, init_task, sync_task, status_task, dedup_task, admin_task
    );
}
