//! metrics-core: the fleet's Prometheus registry.
//!
//! One [`MetricsRegistry`] per process, constructed once at startup and
//! shared via `Arc` with every component that reports a counter, gauge, or
//! histogram. Room- and node-keyed series accumulate one label set per id
//! ever seen; [`MetricsRegistry::reap_room_labels`] and
//! [`MetricsRegistry::reap_node_labels`] drop label combinations for ids no
//! longer active, so a long-lived controller doesn't carry forward a label
//! per room it watched six months ago.

use std::sync::Arc;

use axum::{routing::get, Router};
use prometheus::{
    core::Collector, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Register(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encode(std::io::Error),
}

pub struct MetricsRegistry {
    registry: Registry,
    pub proxy_requests_total: IntCounterVec,
    pub proxy_request_duration_seconds: HistogramVec,
    pub proxy_nodes_active: IntGaugeVec,
    pub stream_events_total: IntCounterVec,
    pub agent_rooms_watched: IntGaugeVec,
    pub scheduler_queue_depth: IntGaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Arc<Self>, MetricsError> {
        let registry = Registry::new();

        let proxy_requests_total = IntCounterVec::new(
            Opts::new("proxy_requests_total", "Proxy requests dispatched, by node and outcome"),
            &["node", "outcome"],
        )?;
        let proxy_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "proxy_request_duration_seconds",
                "Upstream HTTP call latency observed by a worker node",
            ),
            &["node"],
        )?;
        let proxy_nodes_active = IntGaugeVec::new(
            Opts::new("proxy_nodes_active", "1 for each worker node currently announcing NodeMeta"),
            &["node"],
        )?;
        let stream_events_total = IntCounterVec::new(
            Opts::new("stream_events_total", "Aggregation window outcomes, by room, kind, and outcome"),
            &["room_id", "kind", "outcome"],
        )?;
        let agent_rooms_watched = IntGaugeVec::new(
            Opts::new("agent_rooms_watched", "Rooms currently watched by an agent"),
            &["agent_id"],
        )?;
        let scheduler_queue_depth = IntGaugeVec::new(
            Opts::new("scheduler_queue_depth", "Buffered task count in a rate-limited scheduler"),
            &["service"],
        )?;

        registry.register(Box::new(proxy_requests_total.clone()))?;
        registry.register(Box::new(proxy_request_duration_seconds.clone()))?;
        registry.register(Box::new(proxy_nodes_active.clone()))?;
        registry.register(Box::new(stream_events_total.clone()))?;
        registry.register(Box::new(agent_rooms_watched.clone()))?;
        registry.register(Box::new(scheduler_queue_depth.clone()))?;

        Ok(Arc::new(Self {
            registry,
            proxy_requests_total,
            proxy_request_duration_seconds,
            proxy_nodes_active,
            stream_events_total,
            agent_rooms_watched,
            scheduler_queue_depth,
        }))
    }

    pub fn render(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buf)
            .map_err(|e| MetricsError::Encode(std::io::Error::other(e)))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encode(std::io::Error::other(e)))
    }

    /// Drop `agent_rooms_watched` label combinations for any `agent_id` not
    /// present in `active`. Called periodically by the controller's status
    /// loop alongside its own fleet reconciliation.
    pub fn reap_room_labels(&self, active: &[String]) {
        reap_single_label(&self.agent_rooms_watched, active);
    }

    /// Drop `proxy_nodes_active` label combinations for any `node` not in
    /// `active`.
    pub fn reap_node_labels(&self, active: &[String]) {
        reap_single_label(&self.proxy_nodes_active, active);
    }
}

/// Remove every label combination from `vec` whose first label value isn't
/// in `active`. Both gauges this is used on carry exactly one label
/// dimension (`agent_id`, `node`), so the first label is the whole key.
fn reap_single_label<V>(vec: &V, active: &[String])
where
    V: Collector + RemoveLabelValues,
{
    let stale: Vec<String> = vec
        .collect()
        .into_iter()
        .flat_map(|family| family.get_metric().to_vec())
        .filter_map(|metric| metric.get_label().first().map(|l| l.get_value().to_owned()))
        .filter(|value| !active.contains(value))
        .collect();
    for value in stale {
        let _ = vec.remove_label_values(&[value.as_str()]);
    }
}

trait RemoveLabelValues {
    fn remove_label_values(&self, vals: &[&str]) -> prometheus::Result<()>;
}

impl RemoveLabelValues for IntGaugeVec {
    fn remove_label_values(&self, vals: &[&str]) -> prometheus::Result<()> {
        IntGaugeVec::remove_label_values(self, vals)
    }
}

pub fn metrics_router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                match registry.render() {
                    Ok(body) => (
                        axum::http::StatusCode::OK,
                        [("content-type", "text/plain; version=0.0.4")],
                        body,
                    ),
                    Err(e) => (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        [("content-type", "text/plain; version=0.0.4")],
                        e.to_string(),
                    ),
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_renders_registered_series() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics
            .proxy_requests_total
            .with_label_values(&["node-1", "ok"])
            .inc();
        metrics.agent_rooms_watched.with_label_values(&["agent-a"]).set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("proxy_requests_total"));
        assert!(text.contains("node-1"));
        assert!(text.contains("agent_rooms_watched"));
    }

    #[test]
    fn reap_removes_stale_room_gauge_labels() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.agent_rooms_watched.with_label_values(&["agent-a"]).set(2);
        metrics.agent_rooms_watched.with_label_values(&["agent-b"]).set(5);

        metrics.reap_room_labels(&["agent-b".to_owned()]);

        let text = metrics.render().unwrap();
        assert!(!text.contains("agent-a"));
        assert!(text.contains("agent-b"));
    }
}
