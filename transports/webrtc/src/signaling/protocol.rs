//! Peer signaling wire types
//!
//! A peer message travels as `{ mate?, body }` where `body` is the JSON text
//! of `{ "type": ..., "content": ... }`. The server only relays it.

use crate::config::IceServer;
use crate::peer::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Request for the ICE server list (expects a reply)
pub const ICE_SERVERS_EVENT: &str = "ice-servers";

/// Fire-and-forget relay of a [`SignalMessage`] to the other party
pub const PEER_MESSAGE_EVENT: &str = "peer-message";

/// `type` tags understood by [`SignalMessage`]
pub const KNOWN_MESSAGE_TYPES: [&str; 4] = ["offer", "answer", "ice-candidate", "disconnect"];

/// Signaling message exchanged between the two browsers of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Session offer from the caller
    Offer(SessionDescription),
    /// Session answer from the callee
    Answer(SessionDescription),
    /// Trickled ICE candidate
    IceCandidate(IceCandidate),
    /// The other side hung up
    Disconnect,
}

impl SignalMessage {
    /// Get the `type` tag
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::IceCandidate(_) => "ice-candidate",
            SignalMessage::Disconnect => "disconnect",
        }
    }

    /// Convert message to its JSON body text
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize peer message: {}", e))
        })
    }

    /// Parse a message body
    ///
    /// # Errors
    ///
    /// `Error::UnknownMessageType` if `type` is outside the known set,
    /// `Error::SerializationError` if the body is not a valid message.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Peer message body is not JSON: {}", e))
        })?;

        let message_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                Error::SerializationError("Peer message body has no string `type`".to_string())
            })?;

        if !KNOWN_MESSAGE_TYPES.contains(&message_type) {
            return Err(Error::UnknownMessageType(message_type.to_string()));
        }

        serde_json::from_value(value).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize peer message: {}", e))
        })
    }
}

/// Payload of a `peer-message` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEnvelope {
    /// Remote participant id, when the sender knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mate: Option<String>,

    /// JSON text of the [`SignalMessage`]
    pub body: String,
}

impl PeerEnvelope {
    /// Wrap `message` for `mate`
    pub fn new(mate: Option<String>, message: &SignalMessage) -> Result<Self> {
        Ok(Self {
            mate,
            body: message.to_json()?,
        })
    }

    /// Decode the body
    pub fn message(&self) -> Result<SignalMessage> {
        SignalMessage::from_json(&self.body)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize peer envelope: {}", e))
        })
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::SerializationError(format!("Invalid peer-message payload: {}", e))
        })
    }
}

/// Reply to an `ice-servers` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServersReply {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl IceServersReply {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::SignalingError(format!("Invalid ice-servers reply: {}", e))
        })
    }
}
