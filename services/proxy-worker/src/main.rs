//! proxy-worker: subscribes to its node and group subjects, executes
//! outbound HTTP calls, and replies over the bus. See `src/pipeline.rs` for
//! the per-request state machine.

use std::sync::Arc;
use std::time::Instant;

use bus_core::BusHelper;
use clap::Parser;
use metrics_core::MetricsRegistry;
use proxy_wire::{group_request_subject, node_meta_subject, node_request_subject};
use proxy_worker::config::NodeConfig;
use proxy_worker::pipeline::{self, AppState};
use proxy_worker::admin;
use scheduler::Scheduler;
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

    let cfg = NodeConfig::parse();
    info!(node_id = %cfg.node_id, service = %cfg.service, groups = ?cfg.groups, "proxy-worker starting");

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

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(cfg.upstream_timeout_s))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build http client");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let scheduler = match cfg.rate_limit_ms {
        Some(tick_ms) => Scheduler::rate_limited(cfg.scheduler_capacity, tick_ms, shutdown.clone()),
        None => Scheduler::unlimited(cfg.scheduler_capacity, shutdown.clone()),
    };

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        bus: bus.clone(),
        client,
        scheduler,
        metrics: metrics.clone(),
        started_at: Instant::now(),
    });

    let node_subject = node_request_subject(&cfg.service, &cfg.node_id);
    let mut node_requests = match bus.subscribe(node_subject).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "failed to subscribe to node-directed requests");
            std::process::exit(1);
        }
    };

    let mut group_requests = Vec::new();
    for group in &cfg.groups {
        let subject = group_request_subject(&cfg.service, group);
        match bus.queue_subscribe(subject, group.clone()).await {
            Ok(rx) => group_requests.push(rx),
            Err(e) => error!(error = %e, %group, "failed to subscribe to group requests"),
        }
    }

    let meta_subject = node_meta_subject(&cfg.service, &cfg.node_id);
    let mut meta_queries = match bus.subscribe(meta_subject).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "failed to subscribe to meta queries");
            std::process::exit(1);
        }
    };

    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = node_requests.recv().await {
                tokio::spawn(pipeline::handle_inbound(state.clone(), msg));
            }
        });
    }
    for mut rx in group_requests {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                tokio::spawn(pipeline::handle_inbound(state.clone(), msg));
            }
        });
    }
    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = meta_queries.recv().await {
                tokio::spawn(pipeline::handle_meta_query(state.clone(), msg));
            }
        });
    }

    let lifecycle = tokio::spawn(pipeline::run_lifecycle(state.clone(), shutdown.clone()));

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
    let _ = lifecycle.await;
}
