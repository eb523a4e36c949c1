//! Error types for the call hooks and peer session

use crate::media::TrackKind;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Host platform refused to hand out a capture device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// User (or policy) denied camera/microphone access
    #[error("permission to capture media was denied")]
    PermissionDenied,

    /// No capture device of the requested kind is present
    #[error("no {0} capture device available")]
    DeviceNotFound(TrackKind),
}

/// Errors that can occur while signaling, negotiating or running hooks
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Media capture refused by the platform
    #[error("Media capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Peer message with a `type` outside the known set
    #[error("Unknown peer message type: {0}")]
    UnknownMessageType(String),

    /// Invalid data format (element datasets, event payloads)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Peer connection missing or unusable
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Upload failed or was aborted
    #[error("Upload error: {0}")]
    UploadError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl Error {
    /// Check if this error came from media capture
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Error::Capability(_))
    }

    /// Check if this error ends the current call session
    ///
    /// Nothing is retried automatically; the UI decides whether to offer the
    /// user another `connect`.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Capability(_)
                | Error::OperationTimeout(_)
                | Error::SignalingError(_)
                | Error::PeerConnectionError(_)
                | Error::SdpError(_)
                | Error::WebRtcError(_)
        )
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_) | Error::IceCandidateError(_) | Error::SdpError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
