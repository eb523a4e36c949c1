//! In-process signaling channel
//!
//! `MemoryChannel` records every event a hook pushes on an unbounded
//! receiver. [`relay_peer_messages`] drains that receiver and plays the part
//! of the server: it answers `ice-servers` and forwards `peer-message`
//! bodies to the other party.

use super::channel::PushChannel;
use super::protocol::{IceServersReply, PeerEnvelope, ICE_SERVERS_EVENT, PEER_MESSAGE_EVENT};
use crate::config::IceServer;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One event pushed through a [`MemoryChannel`]
#[derive(Debug)]
pub struct PushedEvent {
    pub event: String,
    pub payload: Value,
    /// Present when the pusher waits for a reply
    pub reply: Option<oneshot::Sender<Value>>,
}

impl PushedEvent {
    /// Answer a push-with-reply. Returns false if nobody is waiting.
    pub fn respond(&mut self, value: Value) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

/// Channel that hands pushed events to an in-process receiver
pub struct MemoryChannel {
    name: String,
    tx: mpsc::UnboundedSender<PushedEvent>,
    static_replies: HashMap<String, Value>,
}

impl MemoryChannel {
    /// Create a channel and the receiver observing its pushes
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<PushedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            name: name.into(),
            tx,
            static_replies: HashMap::new(),
        };
        (channel, rx)
    }

    /// Always answer `event` with `reply` instead of waiting on the receiver
    ///
    /// The push is still recorded (without a reply sender).
    pub fn with_reply(mut self, event: impl Into<String>, reply: Value) -> Self {
        self.static_replies.insert(event.into(), reply);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, event: PushedEvent) -> Result<()> {
        self.tx.send(event).map_err(|e| {
            Error::SignalingError(format!(
                "Channel {} is closed, dropped {}",
                self.name, e.0.event
            ))
        })
    }
}

#[async_trait]
impl PushChannel for MemoryChannel {
    async fn push_event(&self, event: &str, payload: Value) -> Result<()> {
        debug!(channel = %self.name, event, "push");
        self.send(PushedEvent {
            event: event.to_string(),
            payload,
            reply: None,
        })
    }

    async fn push_event_with_reply(&self, event: &str, payload: Value) -> Result<Value> {
        debug!(channel = %self.name, event, "push with reply");

        if let Some(reply) = self.static_replies.get(event) {
            self.send(PushedEvent {
                event: event.to_string(),
                payload,
                reply: None,
            })?;
            return Ok(reply.clone());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(PushedEvent {
            event: event.to_string(),
            payload,
            reply: Some(reply_tx),
        })?;

        reply_rx.await.map_err(|_| {
            Error::SignalingError(format!(
                "Channel {} dropped the reply to {}",
                self.name, event
            ))
        })
    }
}

/// Stand-in for the server side of one participant's socket
///
/// Answers `ice-servers` with `ice_servers` and hands every `peer-message`
/// body to `deliver` as the inbound `{ body }` payload. Runs until every
/// sender of `rx` is gone.
pub async fn relay_peer_messages<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<PushedEvent>,
    ice_servers: Vec<IceServer>,
    mut deliver: F,
) where
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let reply = json!(IceServersReply { ice_servers });

    while let Some(mut pushed) = rx.recv().await {
        match pushed.event.as_str() {
            ICE_SERVERS_EVENT => {
                if !pushed.respond(reply.clone()) {
                    debug!("ice-servers requester went away");
                }
            }
            PEER_MESSAGE_EVENT => {
                let envelope = match PeerEnvelope::from_value(pushed.payload.clone()) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed peer-message");
                        continue;
                    }
                };

                debug!(mate = ?envelope.mate, "Relaying peer-message");
                if let Err(e) = deliver(json!({ "body": envelope.body })).await {
                    warn!(error = %e, "Peer-message delivery failed");
                }
            }
            other => {
                debug!(event = other, "Ignoring event with no server handler");
                pushed.respond(json!({}));
            }
        }
    }

    debug!("Signaling relay finished");
}
