//! Peer connection management
//!
//! Native peer abstraction, the webrtc-rs backend and the call session that
//! drives offer/answer/ICE exchange.

pub mod connection;
pub mod rtc;
pub mod session;
pub mod state;

pub use connection::{
    IceCandidate, NativePeer, PeerBackend, PeerConnectionState, PeerEvent, PeerEventHandler,
    SdpType, SessionDescription,
};
pub use rtc::{RtcPeer, RtcPeerBackend};
pub use session::{CallSession, SessionDeps};
pub use state::{MessageDisposition, SessionState};
