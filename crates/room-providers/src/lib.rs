//! room-providers: pluggable sources that feed rooms into the Agent
//! Manager's watched-room set.
//!
//! Two concrete providers, mirroring the source's `StaticConfigProvider` and
//! `ApiConfigProvider`: one ships a fixed room list once at startup, the
//! other mounts `GET`/`DELETE` routes that the controller merges into its
//! own admin router. Both write onto the same shared provide/revoke channel
//! pair — the Manager is the only thing that knows how many providers are
//! currently keeping a room watched.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvidedRoom {
    pub provider_name: &'static str,
    pub room_id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider init failed: {0}")]
    Init(String),
}

/// The channel pair a provider feeds. Shared by every mounted provider —
/// `revoke` carries only a room id, not a provider name, matching the
/// source's `chan<- uint64`; the Manager's own bookkeeping is what turns
/// per-provider adds/revokes into a reference-counted watched set.
#[derive(Clone)]
pub struct ProviderSinks {
    pub provide: mpsc::Sender<ProvidedRoom>,
    pub revoke: mpsc::Sender<u64>,
}

#[async_trait]
pub trait RoomProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn init(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Start producing rooms onto `sinks`. Static providers emit everything
    /// once and return immediately; API-mounted providers have nothing to
    /// do here — they answer through [`RoomProvider::routes`] instead.
    async fn provide(&self, sinks: &ProviderSinks);

    /// Axum routes to merge into the controller's admin router, for
    /// providers that accept rooms dynamically. `None` for providers with
    /// no HTTP surface.
    fn routes(&self, sinks: ProviderSinks) -> Option<Router> {
        let _ = sinks;
        None
    }
}

/// Ships every room in `rooms` once, then goes idle. Revokes nothing —
/// a room named in config is watched for the process lifetime.
pub struct StaticProvider {
    rooms: Vec<u64>,
}

impl StaticProvider {
    pub fn new(rooms: Vec<u64>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl RoomProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn provide(&self, sinks: &ProviderSinks) {
        for &room_id in &self.rooms {
            if sinks.provide.send(ProvidedRoom { provider_name: self.name(), room_id }).await.is_err() {
                warn!("static provider: manager gone, stopping early");
                return;
            }
        }
    }
}

/// Mounts `GET <path>/:room_id` (provide) and `DELETE <path>/:room_id`
/// (revoke) into the controller's admin router. Registration is dynamic:
/// any caller who knows the admin surface can add or drop a room at
/// runtime.
pub struct ApiProvider {
    path: String,
}

impl ApiProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RoomProvider for ApiProvider {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn provide(&self, _sinks: &ProviderSinks) {
        // Nothing to do on startup; rooms arrive via the mounted routes.
    }

    fn routes(&self, sinks: ProviderSinks) -> Option<Router> {
        let state = Arc::new(sinks);
        Some(
            Router::new()
                .route(&format!("{}/:room_id", self.path), get(provide_room).delete(revoke_room))
                .with_state(state),
        )
    }
}

async fn provide_room(State(sinks): State<Arc<ProviderSinks>>, Path(room_id): Path<u64>) -> StatusCode {
    match sinks.provide.send(ProvidedRoom { provider_name: "api", room_id }).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn revoke_room(State(sinks): State<Arc<ProviderSinks>>, Path(room_id): Path<u64>) -> StatusCode {
    match sinks.revoke.send(room_id).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_emits_every_configured_room() {
        let (provide_tx, mut provide_rx) = mpsc::channel(8);
        let (revoke_tx, _revoke_rx) = mpsc::channel(8);
        let sinks = ProviderSinks { provide: provide_tx, revoke: revoke_tx };
        let provider = StaticProvider::new(vec![100, 200, 300]);

        provider.provide(&sinks).await;
        drop(sinks);

        let mut seen = Vec::new();
        while let Some(room) = provide_rx.recv().await {
            assert_eq!(room.provider_name, "static");
            seen.push(room.room_id);
        }
        assert_eq!(seen, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn api_provider_routes_forward_provide_and_revoke() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let (provide_tx, mut provide_rx) = mpsc::channel(8);
        let (revoke_tx, mut revoke_rx) = mpsc::channel(8);
        let sinks = ProviderSinks { provide: provide_tx, revoke: revoke_tx };
        let provider = ApiProvider::new("/rooms");
        let app = provider.routes(sinks).unwrap();

        let resp = app
            .clone()
            .oneshot(Request::builder().method("GET").uri("/rooms/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(provide_rx.recv().await.unwrap(), ProvidedRoom { provider_name: "api", room_id: 42 });

        let resp = app
            .oneshot(Request::builder().method("DELETE").uri("/rooms/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(revoke_rx.recv().await.unwrap(), 42);
    }
}
