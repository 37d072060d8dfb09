//! The notification socket.
//!
//! One WebSocket per process. Outbound frames queue until the socket is
//! open and are flushed in order. Inbound frames go, in order and without
//! loss, to every receiver handed out by [`SyncChannel::pushes`], and are
//! also re-published on the semaphore under
//! [`semaphore::SYNC`](crate::semaphore::SYNC) for observers that can
//! tolerate lag.

pub mod wire;

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::model::ModelKind;
use crate::semaphore::{self, Notice, Semaphore};

pub use wire::{ChannelDescriptor, SyncEvent, SyncMessage, parse_message, subscribe_frame};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("sync channel is already configured")]
    AlreadyConfigured,
    #[error("failed to connect sync socket: {0}")]
    Connect(String),
    #[error("malformed sync frame: {0}")]
    Malformed(String),
}

/// Asks the server to forward mutations of one channel.
pub trait ChannelSubscriber: Send + Sync {
    /// Returns whether the request went out immediately.
    fn subscribe(&self, kind: ModelKind, id: &str) -> bool;
}

#[derive(Default)]
struct ChannelState {
    configured: bool,
    pending: VecDeque<Vec<Value>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    sinks: Vec<mpsc::UnboundedSender<SyncMessage>>,
}

pub struct SyncChannel {
    bus: Arc<Semaphore>,
    state: Mutex<ChannelState>,
}

impl SyncChannel {
    pub fn new(bus: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            state: Mutex::new(ChannelState::default()),
        })
    }

    /// Opens the socket on a background task. Only the first call per
    /// channel does anything.
    pub fn configure(self: &Arc<Self>, url: &str) -> Result<JoinHandle<()>, SyncError> {
        {
            let mut state = self.state.lock();
            if state.configured {
                return Err(SyncError::AlreadyConfigured);
            }
            state.configured = true;
        }
        let channel = Arc::clone(self);
        let url = url.to_string();
        Ok(tokio::spawn(async move {
            if let Err(err) = channel.run(&url).await {
                warn!(target: "waend::sync", url = %url, error = %err, "sync socket failed");
            }
            channel.state.lock().outbound = None;
            info!(target: "waend::sync", url = %url, "sync closed");
        }))
    }

    async fn run(&self, url: &str) -> Result<(), SyncError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|err| SyncError::Connect(err.to_string()))?;
        let (mut sink, mut source) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let backlog: Vec<Vec<Value>> = {
            let mut state = self.state.lock();
            state.outbound = Some(tx);
            state.pending.drain(..).collect()
        };
        info!(target: "waend::sync", url = %url, pending = backlog.len(), "sync opened");
        for args in backlog {
            sink.send(Message::Text(Value::Array(args).to_string()))
                .await
                .map_err(|err| SyncError::Connect(err.to_string()))?;
        }

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        return Err(SyncError::Connect(err.to_string()));
                    }
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_inbound(&text);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(target: "waend::sync", ?frame, "close frame received");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(SyncError::Connect(err.to_string())),
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Sends `args` as one JSON array. Returns `true` when the socket took
    /// it right away, `false` when it was queued.
    pub fn send(&self, args: Vec<Value>) -> bool {
        let mut state = self.state.lock();
        if let Some(outbound) = &state.outbound {
            let frame = Value::Array(args.clone()).to_string();
            if outbound.send(frame).is_ok() {
                return true;
            }
            state.outbound = None;
        }
        state.pending.push_back(args);
        false
    }

    pub fn bus(&self) -> &Arc<Semaphore> {
        &self.bus
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    /// A receiver that gets every parsed push from now on, in arrival
    /// order. Unlike the `sync` topic it never drops messages.
    pub fn pushes(&self) -> mpsc::UnboundedReceiver<SyncMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().sinks.push(tx);
        rx
    }

    /// Parses one inbound frame and publishes it. Malformed frames are
    /// logged and dropped.
    pub fn handle_inbound(&self, text: &str) -> Option<SyncMessage> {
        match parse_message(text) {
            Ok(message) => {
                debug!(
                    target: "waend::sync",
                    channel = %message.channel.kind,
                    id = %message.channel.id,
                    event = %message.event,
                    "push received"
                );
                self.state
                    .lock()
                    .sinks
                    .retain(|sink| sink.send(message.clone()).is_ok());
                semaphore::signal(&self.bus, Notice::Sync(message.clone()));
                Some(message)
            }
            Err(err) => {
                warn!(target: "waend::sync", error = %err, "dropping sync frame");
                None
            }
        }
    }
}

impl ChannelSubscriber for SyncChannel {
    fn subscribe(&self, kind: ModelKind, id: &str) -> bool {
        self.send(subscribe_frame(kind, id))
    }
}
