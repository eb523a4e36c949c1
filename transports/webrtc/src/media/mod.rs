//! Media acquisition, track handles and video sinks

pub mod sink;
pub mod source;
pub mod tracks;

pub use sink::{SlotSource, VideoSlot};
pub use source::{DeviceMediaSource, MediaConstraints, MediaDevice, MediaSource, Permission};
pub use tracks::{LocalStream, LocalTrack, RemoteStream, RemoteTrack, TrackKind};
