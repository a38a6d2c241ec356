//! proxy-gateway: HTTP entry point for the distributed proxy fabric.

use std::sync::Arc;

use axum::middleware;
use axum::routing::post;
use axum::Router;
use bus_core::BusHelper;
use clap::Parser;
use metrics_core::MetricsRegistry;
use proxy_gateway::auth::{require_bearer, AuthState};
use proxy_gateway::config::GatewayConfig;
use proxy_gateway::http::{handle_request, GatewayState};
use proxy_gateway::admin;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = GatewayConfig::parse();
    info!(service = %cfg.service, auth_enabled = cfg.auth_token.is_some(), "proxy-gateway starting");

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

    let auth_state = AuthState { token: cfg.auth_token.clone() };
    let gateway_state = Arc::new(GatewayState {
        cfg: cfg.clone(),
        bus,
        metrics: metrics.clone(),
    });

    let public_router = Router::new()
        .route("/request", post(handle_request))
        .route_layer(middleware::from_fn_with_state(auth_state, require_bearer))
        .with_state(gateway_state);

    let http_listener = match tokio::net::TcpListener::bind(&cfg.http_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cfg.http_bind, "failed to bind public http listener");
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.http_bind, "public http surface listening");

    let admin_router = admin::build_router(metrics);
    let admin_listener = match tokio::net::TcpListener::bind(&cfg.admin_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cfg.admin_bind, "failed to bind admin listener");
            std::process::exit(1);
        }
    };
    info!(bind = %cfg.admin_bind, "admin http surface listening");

    tokio::spawn(async move {
        axum::serve(admin_listener, admin_router).await.ok();
    });

    tokio::select! {
        result = axum::serve(http_listener, public_router) => {
            if let Err(e) = result {
                error!(error = %e, "public http server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }
}
