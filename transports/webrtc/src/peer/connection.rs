//! Native peer connection abstraction
//!
//! The session never talks to a WebRTC stack directly. It drives a
//! [`NativePeer`] built by a [`PeerBackend`] and learns about asynchronous
//! happenings (remote tracks, local ICE candidates, state changes) through a
//! [`PeerEventHandler`] registered at construction time.

use crate::config::IceServer;
use crate::media::{LocalTrack, RemoteTrack};
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Session description as exchanged over signaling (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor in its browser JSON shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Connection state reported by the native peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Asynchronous notification from a native peer
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The remote side added a track
    Track(RemoteTrack),
    /// A local ICE candidate was gathered; `None` marks end of gathering
    IceCandidate(Option<IceCandidate>),
    /// The aggregate connection state changed
    ConnectionStateChange(PeerConnectionState),
}

/// Callback receiving every [`PeerEvent`] of one native peer
pub type PeerEventHandler = Arc<dyn Fn(PeerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// One end of a direct audio/video session
#[async_trait]
pub trait NativePeer: Send + Sync {
    /// Send a local track to the remote side
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Local description after negotiation (may include gathered candidates)
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection and release native resources
    async fn close(&self) -> Result<()>;
}

/// Factory for native peers
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Build a peer using `ice_servers`, delivering its events to `events`
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventHandler,
    ) -> Result<Arc<dyn NativePeer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_browser_shape() {
        let offer = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0\r\n"}));
    }

    #[test]
    fn test_ice_candidate_browser_shape() {
        let json = serde_json::json!({
            "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": null
        });

        let candidate: IceCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());

        let back = serde_json::to_value(&candidate).unwrap();
        assert!(back.get("usernameFragment").is_none());
        assert_eq!(back["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(PeerConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            serde_json::to_string(&PeerConnectionState::Failed).unwrap(),
            "\"failed\""
        );
    }
}
