//! Live call hooks for a server-rendered dating app
//!
//! This crate provides the client side of the app's pages: a one-to-one
//! WebRTC video call negotiated over the page's live channel, plus the
//! smaller page hooks (infinite scroll, block/hide buttons) and a direct
//! S3 uploader.
//!
//! # Features
//!
//! - **Peer-to-peer calls**: offer/answer/ICE exchange relayed through the
//!   server as `peer-message` events
//! - **Server-provided ICE servers**: requested over `ice-servers` with a
//!   bounded wait and a STUN fallback
//! - **Explicit session state**: every inbound message is checked against
//!   one guard before it touches the peer connection
//! - **webrtc-rs backend**: Opus / VP8 sample tracks, default interceptors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Server-rendered element (data-initiator/mate/me)    │
//! │  ↓ mounted / handle_event / destroyed                │
//! │  CallHook                                            │
//! │  └─ CallSession (state machine, one per hook)        │
//! │     ├─ MediaSource  → local video slot               │
//! │     ├─ PeerBackend  → NativePeer (webrtc-rs)         │
//! │     │   └─ PeerEvents → remote slot, DOM events      │
//! │     └─ PushChannel  (ice-servers / peer-message)     │
//! │        ↓                                             │
//! │  Server relays peer-message to the mate              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use livecall_webrtc::{CallConfig, IceServer};
//!
//! let config = CallConfig::audio_only()
//!     .with_fallback_ice_servers(vec![IceServer::stun("stun:stun.l.google.com:19302")])
//!     .with_ice_servers_timeout_ms(Some(5_000));
//!
//! assert!(config.validate().is_ok());
//! assert!(!config.media.video);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use livecall_webrtc::hook::{BroadcastEventSink, Element, HookContext};
//! use livecall_webrtc::media::DeviceMediaSource;
//! use livecall_webrtc::signaling::MemoryChannel;
//! use livecall_webrtc::{CallConfig, CallEnvironment, HookRegistry, RtcPeerBackend};
//! use std::sync::Arc;
//!
//! # async fn example() -> livecall_webrtc::Result<()> {
//! let env = CallEnvironment::new(
//!     CallConfig::default(),
//!     Arc::new(DeviceMediaSource::with_default_devices()),
//!     Arc::new(RtcPeerBackend::new()?),
//! );
//! let registry = HookRegistry::standard(env);
//!
//! let el = Element::new("div")
//!     .with_id("call")
//!     .with_data("initiator", "true")
//!     .with_data("mate", "bob");
//! let (channel, _pushed) = MemoryChannel::new("alice");
//! let ctx = HookContext::new(
//!     el.into_shared(),
//!     Arc::new(channel),
//!     Arc::new(BroadcastEventSink::default()),
//! );
//!
//! // Mounting an initiator connects and sends the offer
//! let hook = registry.mount("WebRTC", ctx).await?;
//! hook.destroyed().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hook;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod upload;

// Re-exports for public API
pub use config::{CallConfig, IceServer};
pub use error::{CapabilityError, Error, Result};
pub use hook::{CallEnvironment, CallHook, Hook, HookContext, HookRegistry};
pub use media::{DeviceMediaSource, MediaConstraints, MediaSource};
pub use peer::{CallSession, PeerBackend, RtcPeerBackend, SessionDeps, SessionState};
pub use signaling::{PushChannel, SignalMessage};
pub use upload::S3Uploader;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
