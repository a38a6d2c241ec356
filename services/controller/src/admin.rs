use std::sync::Arc;

use axum::{routing::get, Router};
use metrics_core::{metrics_router, MetricsRegistry};

pub async fn healthz() -> &'static str {
    "ok"
}

/// Merges the standard health/metrics surface with whatever HTTP routes the
/// mounted room providers expose (e.g. the API provider's add/revoke path).
pub fn build_router(metrics: Arc<MetricsRegistry>, provider_routes: Vec<Router>) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz)).merge(metrics_router(metrics));
    for routes in provider_routes {
        router = router.merge(routes);
    }
    router
}
