//! Local and remote media tracks
//!
//! Tracks here are handles: the samples themselves flow through the native
//! peer connection. A handle knows its identity and whether it is still live,
//! which is all the session needs to tear a call down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone / remote audio
    Audio,
    /// Camera / remote video
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Shared live/ended flag, cloned along with the track handle
#[derive(Debug, Clone)]
struct LiveFlag(Arc<AtomicBool>);

impl LiveFlag {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call ended the track
    fn end(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// A captured local track (camera or microphone)
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    label: String,
    live: LiveFlag,
}

impl LocalTrack {
    /// Create a live local track
    pub fn new(kind: TrackKind, stream_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            stream_id: stream_id.into(),
            label: label.into(),
            live: LiveFlag::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Label of the capture device backing this track
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    /// Stop capturing. Stopping an ended track does nothing.
    pub fn stop(&self) {
        if self.live.end() {
            debug!(track_id = %self.id, kind = %self.kind, "Local track stopped");
        }
    }
}

/// A set of local tracks obtained from one capture request
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    /// Create an empty stream with a fresh id
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a new live track of `kind` to this stream
    pub fn add_track(&mut self, kind: TrackKind, label: impl Into<String>) -> LocalTrack {
        let track = LocalTrack::new(kind, self.id.clone(), label);
        self.tracks.push(track.clone());
        track
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        self.tracks.iter().for_each(LocalTrack::stop);
    }
}

impl Default for LocalStream {
    fn default() -> Self {
        Self::new()
    }
}

/// A track received from the remote peer
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    id: String,
    stream_id: String,
    kind: TrackKind,
    live: LiveFlag,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            live: LiveFlag::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    pub fn stop(&self) {
        if self.live.end() {
            debug!(track_id = %self.id, kind = %self.kind, "Remote track stopped");
        }
    }
}

/// Remote media aggregate
///
/// Collects inbound tracks as they arrive. Reset to empty on disconnect.
#[derive(Debug, Default)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track; a track id already present is ignored
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        self.tracks.iter().for_each(RemoteTrack::stop);
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
