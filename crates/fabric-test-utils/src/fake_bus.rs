//! fake_bus: an in-process stand-in for the subject pub/sub bus.
//!
//! Mirrors `bus-core::BusHelper`'s public surface (publish, request,
//! subscribe, queue_subscribe) closely enough that integration tests can
//! exercise the workspace's subject-routing logic end to end without a real
//! NATS server, the way `MockWsServer`/`MockWsClient` stand in for a real
//! WebSocket peer. Subject matching follows NATS token rules: `.`-separated
//! tokens, `*` matches exactly one token, `>` matches one or more trailing
//! tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum FakeBusError {
    #[error("request timed out waiting for reply")]
    Timeout,
    #[error("message has no reply subject to respond on")]
    NoReplySubject,
}

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    reply: Option<String>,
    bus: FakeBus,
}

impl FakeMessage {
    pub async fn respond(&self, payload: Vec<u8>) -> Result<(), FakeBusError> {
        let reply = self.reply.clone().ok_or(FakeBusError::NoReplySubject)?;
        self.bus.publish(reply, payload).await;
        Ok(())
    }
}

struct Subscriber {
    pattern: Vec<String>,
    queue: Option<String>,
    tx: mpsc::Sender<FakeMessage>,
}

struct Inner {
    subscribers: Vec<Subscriber>,
    pending_replies: HashMap<String, oneshot::Sender<Vec<u8>>>,
    /// Round-robin cursor per queue group name, shared across every subject
    /// that group happens to match.
    round_robin: HashMap<String, usize>,
}

/// Cheap to clone, like `BusHelper` — every clone shares the same routing
/// table.
#[derive(Clone)]
pub struct FakeBus {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                pending_replies: HashMap::new(),
                round_robin: HashMap::new(),
            })),
        }
    }

    pub async fn publish(&self, subject: impl Into<String>, payload: Vec<u8>) {
        self.dispatch(subject.into(), payload, None).await;
    }

    /// Synchronous request/reply: publishes with a generated reply inbox and
    /// waits for a response delivered to that inbox via [`FakeMessage::respond`].
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, FakeBusError> {
        let reply_subject = format!("_INBOX.{}", uuid::Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.pending_replies.insert(reply_subject.clone(), tx);
        }
        self.dispatch(subject.into(), payload, Some(reply_subject.clone())).await;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) | Err(_) => {
                self.inner.lock().await.pending_replies.remove(&reply_subject);
                Err(FakeBusError::Timeout)
            }
        }
    }

    /// Fan-out subscribe: every message matching `subject` is delivered to
    /// every plain subscriber.
    pub async fn subscribe(&self, subject: impl Into<String>) -> mpsc::Receiver<FakeMessage> {
        self.add_subscriber(subject.into(), None).await
    }

    /// Queue-group subscribe: exactly one member sharing `queue` receives
    /// each matching message, chosen round-robin.
    pub async fn queue_subscribe(
        &self,
        subject: impl Into<String>,
        queue: impl Into<String>,
    ) -> mpsc::Receiver<FakeMessage> {
        self.add_subscriber(subject.into(), Some(queue.into())).await
    }

    async fn add_subscriber(&self, subject: String, queue: Option<String>) -> mpsc::Receiver<FakeMessage> {
        let (tx, rx) = mpsc::channel(1024);
        let pattern = subject.split('.').map(str::to_owned).collect();
        self.inner.lock().await.subscribers.push(Subscriber { pattern, queue, tx });
        rx
    }

    async fn dispatch(&self, subject: String, payload: Vec<u8>, reply: Option<String>) {
        // A reply to a pending request() is resolved directly, not fanned
        // out to subject subscribers — it has no subscriber of its own.
        {
            let mut inner = self.inner.lock().await;
            if let Some(tx) = inner.pending_replies.remove(&subject) {
                let _ = tx.send(payload.clone());
                return;
            }
        }

        let tokens: Vec<&str> = subject.split('.').collect();
        let inner = self.inner.lock().await;

        let mut direct = Vec::new();
        let mut by_queue: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, sub) in inner.subscribers.iter().enumerate() {
            if !subject_matches(&sub.pattern, &tokens) {
                continue;
            }
            match &sub.queue {
                None => direct.push(idx),
                Some(queue) => by_queue.entry(queue.clone()).or_default().push(idx),
            }
        }

        let mut targets = direct;
        for (queue, members) in &by_queue {
            let cursor = *inner.round_robin.get(queue).unwrap_or(&0);
            let chosen = members[cursor % members.len()];
            targets.push(chosen);
        }
        drop(inner);

        let mut inner = self.inner.lock().await;
        for queue in by_queue.keys() {
            let entry = inner.round_robin.entry(queue.clone()).or_insert(0);
            *entry += 1;
        }

        for idx in targets {
            let sub = &inner.subscribers[idx];
            let message = FakeMessage {
                subject: subject.clone(),
                payload: payload.clone(),
                reply: reply.clone(),
                bus: self.clone(),
            };
            let _ = sub.tx.send(message).await;
        }
    }
}

fn subject_matches(pattern: &[String], tokens: &[&str]) -> bool {
    let mut p = pattern.iter();
    let mut t = tokens.iter();
    loop {
        match (p.next(), t.next()) {
            (Some(pt), Some(tt)) if pt == ">" => {
                let _ = tt;
                return true;
            }
            (Some(pt), Some(_)) if pt == "*" => continue,
            (Some(pt), Some(tt)) if pt == tt => continue,
            (Some(_), Some(_)) => return false,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_every_plain_subscriber() {
        let bus = FakeBus::new();
        let mut a = bus.subscribe("room.1.event").await;
        let mut b = bus.subscribe("room.*.event").await;

        bus.publish("room.1.event", b"hi".to_vec()).await;

        assert_eq!(a.recv().await.unwrap().payload, b"hi");
        assert_eq!(b.recv().await.unwrap().payload, b"hi");
    }

    #[tokio::test]
    async fn queue_subscribe_delivers_each_message_to_exactly_one_member() {
        let bus = FakeBus::new();
        let mut w1 = bus.queue_subscribe("work.>", "workers").await;
        let mut w2 = bus.queue_subscribe("work.>", "workers").await;

        bus.publish("work.a", b"1".to_vec()).await;
        bus.publish("work.b", b"2".to_vec()).await;

        let mut seen = Vec::new();
        while let Ok(msg) = w1.try_recv() {
            seen.push(msg.payload);
        }
        while let Ok(msg) = w2.try_recv() {
            seen.push(msg.payload);
        }
        seen.sort();
        assert_eq!(seen, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[tokio::test]
    async fn request_reply_round_trips() {
        let bus = FakeBus::new();
        let mut sub = bus.subscribe("echo").await;
        let responder = bus.clone();
        tokio::spawn(async move {
            if let Some(msg) = sub.recv().await {
                msg.respond(msg.payload.clone()).await.unwrap();
            }
        });

        let reply = bus
            .request("echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn request_times_out_with_no_responder() {
        let bus = FakeBus::new();
        let result = bus.request("nobody.home", vec![], Duration::from_millis(20)).await;
        assert!(matches!(result, Err(FakeBusError::Timeout)));
    }
}
