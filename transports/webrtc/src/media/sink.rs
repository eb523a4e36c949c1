//! Video sinks (the local and remote `<video>` elements of a call)

use super::tracks::{LocalStream, RemoteStream};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// What a video slot is currently showing
#[derive(Debug, Clone)]
pub enum SlotSource {
    /// Own camera/microphone preview
    Local(LocalStream),
    /// The remote media aggregate, which keeps growing as tracks arrive
    Remote(Arc<RwLock<RemoteStream>>),
}

/// A video element that can be pointed at a stream and detached again
#[derive(Debug)]
pub struct VideoSlot {
    name: String,
    source: RwLock<Option<SlotSource>>,
}

impl VideoSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point the slot at `source`, replacing whatever it showed
    pub async fn set_stream(&self, source: SlotSource) {
        debug!(slot = %self.name, "Attaching stream to video slot");
        *self.source.write().await = Some(source);
    }

    /// Stop every track of the attached stream and detach it
    pub async fn unset_stream(&self) {
        let Some(source) = self.source.write().await.take() else {
            return;
        };

        match source {
            SlotSource::Local(stream) => stream.stop_all(),
            SlotSource::Remote(stream) => stream.read().await.stop_all(),
        }

        debug!(slot = %self.name, "Detached stream from video slot");
    }

    pub async fn is_attached(&self) -> bool {
        self.source.read().await.is_some()
    }

    /// Number of tracks currently rendered by this slot
    pub async fn track_count(&self) -> usize {
        match self.source.read().await.as_ref() {
            Some(SlotSource::Local(stream)) => stream.tracks().len(),
            Some(SlotSource::Remote(stream)) => stream.read().await.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::tracks::{RemoteTrack, TrackKind};

    #[tokio::test]
    async fn test_unset_stops_local_tracks() {
        let mut stream = LocalStream::new();
        let track = stream.add_track(TrackKind::Video, "cam");

        let slot = VideoSlot::new("local-video");
        slot.set_stream(SlotSource::Local(stream)).await;
        assert!(slot.is_attached().await);
        assert_eq!(slot.track_count().await, 1);

        slot.unset_stream().await;
        assert!(!slot.is_attached().await);
        assert!(!track.is_live());
    }

    #[tokio::test]
    async fn test_remote_slot_follows_aggregate() {
        let remote = Arc::new(RwLock::new(RemoteStream::new()));
        let slot = VideoSlot::new("remote-video");
        slot.set_stream(SlotSource::Remote(Arc::clone(&remote))).await;
        assert_eq!(slot.track_count().await, 0);

        remote
            .write()
            .await
            .add_track(RemoteTrack::new("t1", "s1", TrackKind::Audio));
        assert_eq!(slot.track_count().await, 1);
    }

    #[tokio::test]
    async fn test_unset_on_empty_slot_is_noop() {
        let slot = VideoSlot::new("remote-video");
        slot.unset_stream().await;
        slot.unset_stream().await;
        assert!(!slot.is_attached().await);
    }
}
