//! Signaling channel adapter
//!
//! Wire types for the `ice-servers` / `peer-message` events and the push
//! channel the session talks through.

pub mod channel;
pub mod memory;
pub mod protocol;

pub use channel::PushChannel;
pub use memory::{relay_peer_messages, MemoryChannel, PushedEvent};
pub use protocol::{
    IceServersReply, PeerEnvelope, SignalMessage, ICE_SERVERS_EVENT, PEER_MESSAGE_EVENT,
};
