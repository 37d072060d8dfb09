//! Typed in-process pub/sub.
//!
//! Two shapes are provided:
//! - [`Signal`]: a single-topic observer channel owned by one component
//!   (a model, a shell) and exposed to observers through [`Subscribable`].
//! - [`LocalBus`]: a topic-keyed bus shared across the process.
//!
//! Emission never blocks and never fails for lack of listeners; events sent
//! while nobody is subscribed are simply dropped.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage<T> {
    pub topic: String,
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("subscriber lagged behind by {0} messages")]
    Lagged(u64),
}

pub type BusResult<T> = Result<T, BusError>;

/// Capability of handing out receivers for a typed event stream.
pub trait Subscribable<E: Clone> {
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

#[derive(Debug)]
pub struct Signal<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> Signal<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Delivers `event` to every receiver alive right now. Returns how many
    /// receivers got it.
    pub fn emit(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> Subscribable<E> for Signal<E> {
    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

pub trait Bus<T: Clone>: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage<T>>;
    fn publish(&self, topic: &str, payload: T) -> usize;
}

/// Topic-keyed bus; topics are created lazily on first use.
#[derive(Debug)]
pub struct LocalBus<T> {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage<T>>>>,
    capacity: usize,
}

impl<T: Clone> LocalBus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage<T>> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl<T: Clone> Default for LocalBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Bus<T> for LocalBus<T> {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage<T>> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: T) -> usize {
        self.sender_for(topic)
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .unwrap_or(0)
    }
}

/// Awaits the next event, folding broadcast errors into [`BusError`].
pub async fn next<E: Clone>(rx: &mut broadcast::Receiver<E>) -> BusResult<E> {
    match rx.recv().await {
        Ok(event) => Ok(event),
        Err(broadcast::error::RecvError::Closed) => Err(BusError::Closed),
        Err(broadcast::error::RecvError::Lagged(missed)) => Err(BusError::Lagged(missed)),
    }
}

/// Takes every event already queued on `rx` without waiting. Lagged gaps are
/// skipped.
pub fn drain<E: Clone>(rx: &mut broadcast::Receiver<E>) -> Vec<E> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus: LocalBus<String> = LocalBus::new();
        let mut sub = bus.subscribe("shell:change:context");
        assert_eq!(bus.publish("shell:change:context", "user".into()), 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "shell:change:context");
        assert_eq!(msg.payload, "user");
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus: LocalBus<u32> = LocalBus::new();
        assert_eq!(bus.publish("sync", 7), 0);
        let mut late = bus.subscribe("sync");
        assert!(drain(&mut late).is_empty());
        assert_eq!(bus.topics(), vec!["sync".to_string()]);
    }

    #[test]
    fn signal_emits_synchronously_to_live_receivers() {
        let signal: Signal<&'static str> = Signal::new();
        let mut first = signal.subscribe();
        let mut second = signal.subscribe();
        assert_eq!(signal.emit("change"), 2);
        assert_eq!(drain(&mut first), vec!["change"]);
        assert_eq!(drain(&mut second), vec!["change"]);
    }

    #[test]
    fn drain_skips_lagged_gap() {
        let signal: Signal<u8> = Signal::with_capacity(2);
        let mut rx = signal.subscribe();
        for n in 0..5 {
            signal.emit(n);
        }
        assert_eq!(drain(&mut rx), vec![3, 4]);
    }

    #[tokio::test]
    async fn next_reports_closed_channel() {
        let signal: Signal<u8> = Signal::new();
        let mut rx = signal.subscribe();
        drop(signal);
        assert_eq!(next(&mut rx).await, Err(BusError::Closed));
    }
}
