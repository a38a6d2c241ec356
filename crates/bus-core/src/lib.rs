//! bus-core: thin adapter over the fabric's subject pub/sub bus.
//!
//! Every other crate in the workspace talks to the bus through this type
//! instead of naming `async_nats` directly, mirroring how `services/server`
//! only ever names `sqlx`, never `tokio_postgres`. The bus itself (and its
//! JetStream-equivalent persistent stream) is an external collaborator per
//! the system spec — this crate's job is to narrow that collaborator down
//! to the five operations the rest of the fabric actually needs: publish,
//! request/reply, channel-subscribe, queue-group channel-subscribe, and
//! durable stream creation.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::AckPolicy};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(#[from] async_nats::ConnectError),
    #[error("publish failed: {0}")]
    Publish(#[from] async_nats::PublishError),
    #[error("request failed: {0}")]
    Request(#[from] async_nats::RequestError),
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),
    #[error("jetstream context failed: {0}")]
    Context(#[from] async_nats::jetstream::context::CreateStreamError),
    #[error("jetstream stream lookup failed: {0}")]
    StreamLookup(#[from] async_nats::jetstream::context::GetStreamError),
    #[error("jetstream consumer failed: {0}")]
    Consumer(#[from] async_nats::jetstream::stream::ConsumerError),
    #[error("jetstream messages failed: {0}")]
    Messages(#[from] async_nats::jetstream::consumer::StreamError),
    #[error("jetstream ack failed: {0}")]
    Ack(String),
    #[error("request timed out waiting for reply")]
    Timeout,
    #[error("message has no reply subject to respond on")]
    NoReplySubject,
}

/// A message delivered to a channel subscriber.
///
/// Carries its own ack sink so callers can follow spec.md's nak/term
/// redelivery contract uniformly whether the subscription is an ephemeral
/// core subscription (ack/nak/term are no-ops, logged once) or a durable,
/// JetStream-backed consumer (ack/nak/term drive real redelivery).
pub struct InboundMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    reply: Option<String>,
    sink: AckSink,
    client: async_nats::Client,
}

enum AckSink {
    Ephemeral,
    Jetstream(jetstream::Message),
}

impl InboundMessage {
    /// Acknowledge successful processing. No-op (but explicit) on ephemeral
    /// subscriptions — there is nothing to redeliver.
    pub async fn ack(&self) -> Result<(), BusError> {
        match &self.sink {
            AckSink::Ephemeral => Ok(()),
            AckSink::Jetstream(msg) => msg
                .ack()
                .await
                .map_err(|e| BusError::Ack(e.to_string())),
        }
    }

    /// Negative-acknowledge: retriable failure, the bus should redeliver.
    pub async fn nak(&self) -> Result<(), BusError> {
        match &self.sink {
            AckSink::Ephemeral => {
                warn!(subject = %self.subject, "nak on a non-redeliverable message");
                Ok(())
            }
            AckSink::Jetstream(msg) => msg
                .ack_with(jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| BusError::Ack(e.to_string())),
        }
    }

    /// Terminate: non-retriable failure, the bus must not redeliver.
    pub async fn term(&self) -> Result<(), BusError> {
        match &self.sink {
            AckSink::Ephemeral => {
                warn!(subject = %self.subject, "term on a non-redeliverable message");
                Ok(())
            }
            AckSink::Jetstream(msg) => msg
                .ack_with(jetstream::AckKind::Term)
                .await
                .map_err(|e| BusError::Ack(e.to_string())),
        }
    }

    /// Signal that processing is still underway, resetting the bus's
    /// redelivery timer without marking the message complete. A no-op on
    /// ephemeral subscriptions, which have no redelivery timer to reset.
    pub async fn in_progress(&self) -> Result<(), BusError> {
        match &self.sink {
            AckSink::Ephemeral => Ok(()),
            AckSink::Jetstream(msg) => msg
                .ack_with(jetstream::AckKind::Progress)
                .await
                .map_err(|e| BusError::Ack(e.to_string())),
        }
    }

    /// Reply on this message's inbox, if the sender was expecting one.
    pub async fn respond(&self, payload: Vec<u8>) -> Result<(), BusError> {
        let reply = self.reply.as_ref().ok_or(BusError::NoReplySubject)?;
        self.client
            .publish(reply.clone(), payload.into())
            .await
            .map_err(BusError::Publish)
    }
}

/// Handle to the bus. Cheap to clone — wraps `async_nats::Client`, itself a
/// cheap handle to the underlying connection.
#[derive(Clone)]
pub struct BusHelper {
    client: async_nats::Client,
    js: jetstream::Context,
}

impl BusHelper {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url).await?;
        let js = jetstream::new(client.clone());
        Ok(Self { client, js })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Fire-and-forget publish.
    pub async fn publish(&self, subject: impl Into<String>, payload: Vec<u8>) -> Result<(), BusError> {
        self.client.publish(subject.into(), payload.into()).await?;
        Ok(())
    }

    /// Synchronous request/reply with a caller-supplied timeout.
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError> {
        let subject = subject.into();
        let fut = self.client.request(subject.clone(), payload.into());
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(msg)) => Ok(msg.payload.to_vec()),
            Ok(Err(e)) => Err(BusError::Request(e)),
            Err(_) => {
                debug!(%subject, ?timeout, "bus request timed out");
                Err(BusError::Timeout)
            }
        }
    }

    /// Channel-subscribe: every matching message is delivered to every
    /// subscriber (fan-out). Used for broadcast subjects like `agent.info`
    /// and `<svc>.event.*`.
    pub async fn subscribe(&self, subject: impl Into<String>) -> Result<mpsc::Receiver<InboundMessage>, BusError> {
        let sub = self.client.subscribe(subject.into()).await?;
        Ok(self.pump_ephemeral(sub))
    }

    /// Queue-group channel-subscribe: exactly one member of `queue` consumes
    /// each message. Used by proxy worker nodes sharing a group subject.
    pub async fn queue_subscribe(
        &self,
        subject: impl Into<String>,
        queue: impl Into<String>,
    ) -> Result<mpsc::Receiver<InboundMessage>, BusError> {
        let sub = self
            .client
            .queue_subscribe(subject.into(), queue.into())
            .await?;
        Ok(self.pump_ephemeral(sub))
    }

    fn pump_ephemeral(&self, mut sub: async_nats::Subscriber) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(1024);
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let inbound = InboundMessage {
                    subject: msg.subject.to_string(),
                    payload: msg.payload.to_vec(),
                    reply: msg.reply.map(|r| r.to_string()),
                    sink: AckSink::Ephemeral,
                    client: client.clone(),
                };
                if tx.send(inbound).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Ensure the durable (JetStream-equivalent) stream exists, creating it
    /// if necessary. Idempotent — safe to call on every startup.
    pub async fn ensure_stream(
        &self,
        name: impl Into<String>,
        subjects: Vec<String>,
    ) -> Result<(), BusError> {
        self.js
            .get_or_create_stream(jetstream::stream::Config {
                name: name.into(),
                subjects,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Bind a durable, explicit-ack consumer over `stream` filtered to
    /// `filter_subject`, delivering messages whose `ack`/`nak`/`term` drive
    /// real redelivery. Used where a worker needs the at-least-once +
    /// redeliver-on-nak contract from spec.md §4.2/§7.
    pub async fn durable_consume(
        &self,
        stream: &str,
        durable_name: impl Into<String>,
        filter_subject: impl Into<String>,
    ) -> Result<mpsc::Receiver<InboundMessage>, BusError> {
        let stream = self.js.get_stream(stream).await?;
        let consumer = stream
            .create_consumer(jetstream::consumer::pull::Config {
                durable_name: Some(durable_name.into()),
                filter_subject: filter_subject.into(),
                ack_policy: AckPolicy::Explicit,
                ..Default::default()
            })
            .await?;

        let (tx, rx) = mpsc::channel(1024);
        let client = self.client.clone();
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "failed to open consumer message stream");
                    return;
                }
            };
            while let Some(Ok(msg)) = messages.next().await {
                let reply = msg.reply.clone().map(|r| r.to_string());
                let subject = msg.subject.to_string();
                let payload = msg.payload.to_vec();
                let inbound = InboundMessage {
                    subject,
                    payload,
                    reply,
                    sink: AckSink::Jetstream(msg),
                    client: client.clone(),
                };
                if tx.send(inbound).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
