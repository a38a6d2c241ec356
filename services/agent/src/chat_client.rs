//! chat_client: the agent's boundary onto the actual upstream live-chat
//! transport.
//!
//! The wire protocol of any one upstream platform (handshake, framing,
//! compression) is an external collaborator, the same way the bus itself
//! is — this crate only needs "join a room, leave a room, receive decoded
//! JSON frames for the rooms currently joined". [`NullChatClient`] is the
//! wiring used until a concrete transport is plugged in, the same way
//! `forwarder`'s early `main.rs` stubbed subsystems pending later tasks.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A single decoded upstream frame: a `cmd` tag and its JSON body, tagged
/// with the room it arrived on and the instant it arrived (used to compute
/// the `Wait` trace step).
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub room_id: u64,
    pub cmd: String,
    pub body: Value,
    pub arrived_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatClientError {
    #[error("transport error joining room {room_id}: {message}")]
    Join { room_id: u64, message: String },
    #[error("transport error leaving room {room_id}: {message}")]
    Leave { room_id: u64, message: String },
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start delivering frames for every room subsequently joined.
    fn frames(&self) -> mpsc::Receiver<RawFrame>;

    async fn join_room(&self, room_id: u64) -> Result<(), ChatClientError>;

    async fn leave_room(&self, room_id: u64) -> Result<(), ChatClientError>;
}

/// Wiring placeholder: joins/leaves always succeed and no frames ever
/// arrive. Used until a real transport for a specific upstream platform is
/// plugged in.
pub struct NullChatClient;

#[async_trait]
impl ChatClient for NullChatClient {
    fn frames(&self) -> mpsc::Receiver<RawFrame> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    async fn join_room(&self, _room_id: u64) -> Result<(), ChatClientError> {
        Ok(())
    }

    async fn leave_room(&self, _room_id: u64) -> Result<(), ChatClientError> {
        Ok(())
    }
}
