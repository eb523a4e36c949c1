//! Local media acquisition

use super::tracks::{LocalStream, TrackKind};
use crate::error::CapabilityError;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which kinds of media a capture request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Microphone only
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    /// Track kinds requested, audio first
    pub fn requested_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Host capability that hands out live capture streams
///
/// Implementations must not retry: a refusal is reported once and the caller
/// decides what to show the user.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Request capture for `constraints`
    ///
    /// # Errors
    ///
    /// `Error::Capability` if permission is denied or a requested device kind
    /// is absent; `Error::InvalidConfig` if nothing is requested.
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<LocalStream>;
}

/// Capture device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub device_id: String,
    pub kind: TrackKind,
    pub label: String,
}

impl MediaDevice {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
        }
    }
}

/// Capture permission state for the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
}

/// Media source backed by an enumerated device list and a permission state
///
/// ```
/// use livecall_webrtc::media::{DeviceMediaSource, MediaConstraints, MediaSource};
///
/// # tokio_test::block_on(async {
/// let source = DeviceMediaSource::with_default_devices();
/// let stream = source
///     .get_user_media(&MediaConstraints::audio_only())
///     .await
///     .unwrap();
/// assert_eq!(stream.tracks().len(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct DeviceMediaSource {
    devices: Vec<MediaDevice>,
    permission: Permission,
}

impl DeviceMediaSource {
    pub fn new(devices: Vec<MediaDevice>, permission: Permission) -> Self {
        Self {
            devices,
            permission,
        }
    }

    /// A granted source with one default microphone and one default camera
    pub fn with_default_devices() -> Self {
        Self::new(
            vec![
                MediaDevice::new(TrackKind::Audio, "Default microphone"),
                MediaDevice::new(TrackKind::Video, "Default camera"),
            ],
            Permission::Granted,
        )
    }

    /// Devices visible to the page
    pub fn enumerate_devices(&self) -> &[MediaDevice] {
        &self.devices
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
    }
}

#[async_trait]
impl MediaSource for DeviceMediaSource {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<LocalStream> {
        if constraints.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one of audio or video must be requested".to_string(),
            ));
        }

        if self.permission == Permission::Denied {
            warn!("Media capture refused: permission denied");
            return Err(CapabilityError::PermissionDenied.into());
        }

        let mut stream = LocalStream::new();
        for kind in constraints.requested_kinds() {
            let device = self
                .devices
                .iter()
                .find(|d| d.kind == kind)
                .ok_or(CapabilityError::DeviceNotFound(kind))?;
            stream.add_track(kind, device.label.clone());
        }

        info!(
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Acquired local media"
        );

        Ok(stream)
    }
}
