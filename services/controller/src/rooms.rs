//! rooms: the watched-room set, aggregated from every mounted room
//! provider's provide/revoke channel (spec §4.7 union semantics).
//!
//! A room stays watched while at least one provider still provides it —
//! tracked as a simple reference count rather than a provider-keyed set,
//! since `room-providers`' revoke channel carries only a room id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use room_providers::ProvidedRoom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct RoomSet {
    counts: RwLock<HashMap<u64, u32>>,
}

impl RoomSet {
    pub fn new() -> Self {
        Self { counts: RwLock::new(HashMap::new()) }
    }

    pub fn watched(&self) -> Vec<u64> {
        self.counts.read().keys().copied().collect()
    }

    fn provide(&self, room_id: u64) {
        *self.counts.write().entry(room_id).or_insert(0) += 1;
    }

    fn revoke(&self, room_id: u64) {
        let mut counts = self.counts.write();
        if let Some(count) = counts.get_mut(&room_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&room_id);
            }
        }
    }

    /// Drain both provider channels until every sender drops or `shutdown`
    /// fires.
    pub async fn run(
        self: Arc<Self>,
        mut provide_rx: mpsc::Receiver<ProvidedRoom>,
        mut revoke_rx: mpsc::Receiver<u64>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                room = provide_rx.recv() => {
                    let Some(room) = room else { continue };
                    info!(room_id = room.room_id, provider = room.provider_name, "room provided");
                    self.provide(room.room_id);
                }
                room_id = revoke_rx.recv() => {
                    let Some(room_id) = room_id else { continue };
                    info!(room_id, "room revoked");
                    self.revoke(room_id);
                }
            }
        }
    }
}

impl Default for RoomSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_stays_watched_until_every_provider_revokes() {
        let rooms = RoomSet::new();
        rooms.provide(100);
        rooms.provide(100);
        assert_eq!(rooms.watched(), vec![100]);

        rooms.revoke(100);
        assert_eq!(rooms.watched(), vec![100], "still one provider holding it");

        rooms.revoke(100);
        assert!(rooms.watched().is_empty());
    }

    #[test]
    fn revoke_below_zero_is_a_no_op() {
        let rooms = RoomSet::new();
        rooms.revoke(100);
        assert!(rooms.watched().is_empty());
    }
}
