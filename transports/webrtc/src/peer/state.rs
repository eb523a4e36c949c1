//! Call session state machine
//!
//! ```text
//! Idle → Connecting → Connected → Negotiating → Active → Closed
//!                         ↑                                 │
//!                         └──────────── connect ────────────┘
//! ```
//!
//! Inbound signaling is checked once, against the current state, before it
//! reaches any handler.

use crate::signaling::SignalMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a `CallSession`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing acquired yet
    Idle,
    /// Waiting on local media and the ICE server list
    Connecting,
    /// Peer connection exists, no offer/answer in flight
    Connected,
    /// Offer or answer sent, waiting for the other side
    Negotiating,
    /// At least one remote track arrived
    Active,
    /// Torn down (terminal until the next `connect`)
    Closed,
}

impl SessionState {
    /// Whether a native peer connection exists in this state
    pub fn has_connection(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Negotiating | SessionState::Active
        )
    }

    /// Whether `connect` may start from this state
    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }

    /// Validate a state transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle | Closed, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Negotiating) => true,
            // Remote media can arrive before the answer is processed
            (Connected | Negotiating, Active) => true,
            (Active, Negotiating) => true,
            (_, Closed) => true,
            _ => false,
        }
    }

    /// Decide whether an inbound message may be processed now
    ///
    /// `has_peer` tells whether a native peer connection is currently held,
    /// which is what answers, candidates and hang ups act on.
    pub fn admit(&self, message: &SignalMessage, has_peer: bool) -> MessageDisposition {
        match message {
            SignalMessage::Offer(_) => MessageDisposition::Accept,
            SignalMessage::Answer(_) | SignalMessage::IceCandidate(_) => {
                if has_peer {
                    MessageDisposition::Accept
                } else {
                    MessageDisposition::Drop(format!(
                        "no peer connection for {} in state {}",
                        message.message_type(),
                        self
                    ))
                }
            }
            SignalMessage::Disconnect => {
                if has_peer || *self == SessionState::Connecting {
                    MessageDisposition::Accept
                } else {
                    MessageDisposition::Drop(format!("nothing to disconnect in state {}", self))
                }
            }
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Outcome of [`SessionState::admit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDisposition {
    Accept,
    /// Discarded (not queued) with the reason to log
    Drop(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{IceCandidate, SessionDescription};

    #[test]
    fn test_messages_without_peer_are_dropped() {
        let answer = SignalMessage::Answer(SessionDescription::answer("v=0"));
        let candidate = SignalMessage::IceCandidate(IceCandidate::default());

        for state in [SessionState::Idle, SessionState::Connecting, SessionState::Closed] {
            assert!(matches!(state.admit(&answer, false), MessageDisposition::Drop(_)));
            assert!(matches!(state.admit(&candidate, false), MessageDisposition::Drop(_)));
        }

        for state in [
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Negotiating,
            SessionState::Active,
        ] {
            assert_eq!(state.admit(&answer, true), MessageDisposition::Accept);
            assert_eq!(state.admit(&candidate, true), MessageDisposition::Accept);
        }
    }

    #[test]
    fn test_offer_always_admitted() {
        let offer = SignalMessage::Offer(SessionDescription::offer("v=0"));
        assert_eq!(SessionState::Idle.admit(&offer, false), MessageDisposition::Accept);
        assert_eq!(SessionState::Active.admit(&offer, true), MessageDisposition::Accept);
    }

    #[test]
    fn test_disconnect_needs_something_to_close() {
        let disconnect = SignalMessage::Disconnect;
        assert!(matches!(
            SessionState::Idle.admit(&disconnect, false),
            MessageDisposition::Drop(_)
        ));
        assert!(matches!(
            SessionState::Closed.admit(&disconnect, false),
            MessageDisposition::Drop(_)
        ));
        assert_eq!(
            SessionState::Connecting.admit(&disconnect, false),
            MessageDisposition::Accept
        );
        assert_eq!(
            SessionState::Active.admit(&disconnect, true),
            MessageDisposition::Accept
        );
        // A peer still held in Closed can always be released
        assert_eq!(
            SessionState::Closed.admit(&disconnect, true),
            MessageDisposition::Accept
        );
    }

    #[test]
    fn test_transitions() {
        assert!(SessionState::Idle.can_transition_to(SessionState::Connecting));
        assert!(SessionState::Closed.can_transition_to(SessionState::Connecting));
        assert!(SessionState::Negotiating.can_transition_to(SessionState::Active));
        assert!(SessionState::Active.can_transition_to(SessionState::Closed));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Active));
        assert!(!SessionState::Connected.can_transition_to(SessionState::Connecting));
    }
}
