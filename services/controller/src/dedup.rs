//! dedup: the Aggregation Window (spec §4.6) — subscribes to
//! `<prefix>.stream.*`, suppresses duplicate delivery of the same event
//! across agents, and routes meta/master-only kinds to their own handling.

use std::sync::Arc;
use std::time::Duration;

use agent_wire::{AgentMask, FansMedalMeta, StreamEvent, UserMeta};
use bus_core::{BusHelper, InboundMessage};
use metrics_core::MetricsRegistry;
use tokio_util::sync::CancellationToken;
use ttl_cache::{DedupOutcome, EvictHook, TtlCache};
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::fleet::Fleet;
use crate::meta_index::MetaIndex;

pub struct AggregationWindow {
    cfg: ControllerConfig,
    bus: BusHelper,
    fleet: Arc<Fleet>,
    metrics: Arc<MetricsRegistry>,
    meta_index: MetaIndex,
    dedup_cache: Arc<TtlCache>,
}

impl AggregationWindow {
    pub fn new(cfg: ControllerConfig, bus: BusHelper, fleet: Arc<Fleet>, metrics: Arc<MetricsRegistry>) -> Self {
        let meta_ttl = Duration::from_secs(cfg.meta_cache_ttl_s);
        let dedup_ttl = Duration::from_secs(cfg.dedup_window_s);

        let hook_fleet = Arc::clone(&fleet);
        let hook: EvictHook = Arc::new(move |key, value| {
            let Some((category, _)) = key.split_once(':') else { return };
            let masks = AgentMask::split_many(value);
            hook_fleet.add_agent_hit_mask(&masks, category);
        });

        Self {
            fleet,
            metrics,
            meta_index: MetaIndex::new(meta_ttl),
            dedup_cache: TtlCache::with_evict_hook(1024, dedup_ttl, Some(hook)),
            cfg,
            bus,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let subject = format!("{}.stream.*", self.cfg.prefix);
        let mut rx = match self.bus.subscribe(subject).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "failed to subscribe to stream.*");
                return;
            }
        };

        self.dedup_cache.spawn_sweeper(Duration::from_secs(5));
        self.meta_index.spawn_sweepers(Duration::from_secs(60));

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.dedup_cache.flush();
                    return;
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else { return };
                    self.handle(msg).await;
                }
            }
        }
    }

    async fn handle(&self, msg: InboundMessage) {
        let Some(kind) = msg.subject.rsplit('.').next() else { return };
        match kind {
            "userInfoMeta" => self.handle_user_meta(&msg.payload),
            "fansMedal" => self.handle_medal_meta(&msg.payload),
            "online" | "onlineV2" => self.handle_master_only(&msg.payload),
            _ => self.handle_dedup_kind(&msg.payload),
        }
    }

    fn handle_user_meta(&self, payload: &[u8]) {
        match agent_wire::decode::<UserMeta>(payload) {
            Ok(user) => {
                let _ = self.meta_index.index_user(user);
            }
            Err(e) => warn!(error = %e, "malformed userInfoMeta payload"),
        }
    }

    fn handle_medal_meta(&self, payload: &[u8]) {
        match agent_wire::decode::<FansMedalMeta>(payload) {
            Ok(medal) => {
                let _ = self.meta_index.index_medal(medal);
            }
            Err(e) => warn!(error = %e, "malformed fansMedal payload"),
        }
    }

    /// `online`/`onlineV2`: no dedup, accepted only from the elected master.
    fn handle_master_only(&self, payload: &[u8]) {
        let Ok(event) = agent_wire::decode::<StreamEvent>(payload) else {
            warn!("malformed master-only stream event payload");
            return;
        };
        let kind = event.kind();
        let room_id = event.meta().room_id.unwrap_or(0).to_string();
        let is_master = self.fleet.master().as_deref() == Some(event.meta().agent_id.as_str());
        let outcome = if is_master { "accepted" } else { "dropped_not_master" };
        self.metrics
            .stream_events_total
            .with_label_values(&[&room_id, kind, outcome])
            .inc();
        debug!(kind, room_id, outcome, "master-only stream event");
    }

    fn handle_dedup_kind(&self, payload: &[u8]) {
        let Ok(event) = agent_wire::decode::<StreamEvent>(payload) else {
            warn!("malformed dedup-kind stream event payload");
            return;
        };
        let kind = event.kind();
        let room_id = event.meta().room_id.unwrap_or(0).to_string();

        let Some(mask) = self.fleet.mask_for(&event.meta().agent_id) else {
            self.metrics.stream_events_total.with_label_values(&[&room_id, kind, "unknown_agent"]).inc();
            return;
        };
        let Some(key) = event.dedup_key() else { return };

        let outcome = self.dedup_cache.probe_and_append(&key, &mask.to_be_bytes());
        match outcome {
            DedupOutcome::Miss => {
                self.metrics.stream_events_total.with_label_values(&[&room_id, kind, "emitted"]).inc();
                debug!(kind, room_id, key, "emitted to downstream sink");
            }
            DedupOutcome::Hit => {
                self.metrics.stream_events_total.with_label_values(&[&room_id, kind, "duplicate"]).inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_wire::{BasicMsgMeta, Damaku};

    fn damaku_event(agent_id: &str, room_id: u64, uid: u64, ts: u64) -> StreamEvent {
        StreamEvent::Damaku(Damaku {
            meta: BasicMsgMeta::new(agent_id, Some(room_id), ts),
            uid,
            username: "bob".to_owned(),
            face: None,
            text: "hi".to_owned(),
            medal: None,
        })
    }

    #[test]
    fn dedup_key_is_identical_across_agents_for_same_event() {
        let a = damaku_event("agent-a", 7, 42, 1_700_000_000_000);
        let b = damaku_event("agent-b", 7, 42, 1_700_000_000_000);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
