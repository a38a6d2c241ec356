//! admin: the gateway's own HTTP surface — liveness and Prometheus metrics.

use std::sync::Arc;

use axum::{routing::get, Router};
use metrics_core::{metrics_router, MetricsRegistry};

pub async fn healthz() -> &'static str {
    "ok"
}

pub fn build_router(metrics: Arc<MetricsRegistry>) -> Router {
    Router::new().route("/healthz", get(healthz)).merge(metrics_router(metrics))
}
