//! pipeline: the six-step request-handling pipeline for a proxy worker node.
//!
//! Grounded on `client-http-proxy/client.go`'s `requestHandle`/`doRequest`,
//! generalized onto `bus-core::InboundMessage` so ack/nak/term drive real
//! redelivery over a durable consumer instead of the original's
//! fire-and-forget goroutine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bus_core::{BusHelper, InboundMessage};
use metrics_core::MetricsRegistry;
use proxy_wire::{decode, encode, event_subject, task_subject, NodeMeta, Request, TaskState, TaskStatusMsg};
use reqwest::Client;
use scheduler::Scheduler;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::handler;

pub struct AppState {
    pub cfg: NodeConfig,
    pub bus: BusHelper,
    pub client: Client,
    pub scheduler: Scheduler,
    pub metrics: Arc<MetricsRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn node_meta(&self) -> NodeMeta {
        NodeMeta {
            node_id: self.cfg.node_id.clone(),
            groups: self.cfg.groups.clone(),
            rate_limit_ms: self.cfg.rate_limit_ms,
            gzip_min_length: self.cfg.gzip_min_length,
            uptime_s: self.started_at.elapsed().as_secs(),
            heartbeat_interval_s: self.cfg.heartbeat_interval_s,
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    async fn publish_status(&self, state: TaskState, request_id: u64) {
        let msg = TaskStatusMsg {
            state,
            request_id,
            trace_id: format!("{}:{request_id}", self.cfg.node_id),
        };
        let bytes = match encode(&msg) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode task status");
                return;
            }
        };
        let subject = task_subject(&self.cfg.service, request_id);
        if let Err(e) = self.bus.publish(subject, bytes).await {
            warn!(error = %e, "failed to publish task status");
        }
    }
}

/// Step 1-3: decode the envelope and enqueue the call. Malformed envelopes
/// are terminal — they can never succeed on redelivery.
pub async fn handle_inbound(state: Arc<AppState>, msg: InboundMessage) {
    let request: Request = match decode(&msg.payload) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed proxy request envelope");
            if let Err(e) = msg.term().await {
                warn!(error = %e, "failed to terminate malformed request");
            }
            state.publish_status(TaskState::Failed, 0).await;
            return;
        }
    };

    state.publish_status(TaskState::OnProcess, request.request_id).await;

    let task_state = state.clone();
    if let Err(e) = state
        .scheduler
        .submit(async move {
            run_task(task_state, msg, request).await;
        })
        .await
    {
        warn!(error = %e, "failed to enqueue proxy task");
    }
}

/// Step 4-6: dequeue, perform the HTTP call under a watchdog, and resolve.
async fn run_task(state: Arc<AppState>, msg: InboundMessage, request: Request) {
    state.publish_status(TaskState::Scheduled, request.request_id).await;

    let call = handler::execute(&state.client, &request, state.cfg.gzip_min_length);
    tokio::pin!(call);
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    watchdog.tick().await; // first tick fires immediately, consume it before gating on real work

    let result = loop {
        tokio::select! {
            res = &mut call => break res,
            _ = watchdog.tick() => {
                if let Err(e) = msg.in_progress().await {
                    warn!(error = %e, "failed to extend in-progress ack");
                }
            }
        }
    };

    match result {
        Ok(packed) => match encode(&packed) {
            Ok(bytes) => match msg.respond(bytes).await {
                Ok(()) => {
                    let _ = msg.ack().await;
                    state
                        .metrics
                        .proxy_requests_total
                        .with_label_values(&[&state.cfg.node_id, "ok"])
                        .inc();
                    state.publish_status(TaskState::Finished, request.request_id).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to reply to proxy request");
                    state
                        .metrics
                        .proxy_requests_total
                        .with_label_values(&[&state.cfg.node_id, "error"])
                        .inc();
                    state.publish_status(TaskState::Failed, request.request_id).await;
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to encode packed response");
                let _ = msg.term().await;
                state.publish_status(TaskState::Failed, request.request_id).await;
            }
        },
        Err(e) => {
            warn!(error = %e, request_id = request.request_id, "upstream call failed");
            let _ = msg.nak().await;
            state
                .metrics
                .proxy_requests_total
                .with_label_values(&[&state.cfg.node_id, "error"])
                .inc();
            state.publish_status(TaskState::Failed, request.request_id).await;
        }
    }
}

/// Respond to a synchronous `<svc>.<node>.meta` query with this node's
/// current [`NodeMeta`].
pub async fn handle_meta_query(state: Arc<AppState>, msg: InboundMessage) {
    match encode(&state.node_meta()) {
        Ok(bytes) => {
            if let Err(e) = msg.respond(bytes).await {
                warn!(error = %e, "failed to respond to meta query");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode node meta"),
    }
}

/// Publishes `event.online` once, `event.heartbeat` on every tick, and
/// `event.offline` when `shutdown` fires.
pub async fn run_lifecycle(state: Arc<AppState>, shutdown: tokio_util::sync::CancellationToken) {
    publish_event(&state, "online").await;
    mark_node_active(&state);

    let mut ticker = tokio::time::interval(Duration::from_secs(state.cfg.heartbeat_interval_s.max(1)));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                publish_event(&state, "heartbeat").await;
                mark_node_active(&state);
            }
        }
    }

    publish_event(&state, "offline").await;
}

/// Keep this node's own `proxy_nodes_active` label alive and reap everything
/// else — a worker only ever speaks for itself.
fn mark_node_active(state: &Arc<AppState>) {
    state.metrics.proxy_nodes_active.with_label_values(&[&state.cfg.node_id]).set(1);
    state.metrics.reap_node_labels(&[state.cfg.node_id.clone()]);
}

async fn publish_event(state: &Arc<AppState>, kind: &str) {
    let meta = state.node_meta();
    match encode(&meta) {
        Ok(bytes) => {
            let subject = event_subject(&state.cfg.service, kind);
            if let Err(e) = state.bus.publish(subject, bytes).await {
                warn!(error = %e, %kind, "failed to publish node lifecycle event");
            } else {
                info!(%kind, node_id = %state.cfg.node_id, "published node lifecycle event");
            }
        }
        Err(e) => warn!(error = %e, %kind, "failed to encode node meta for lifecycle event"),
    }
}
