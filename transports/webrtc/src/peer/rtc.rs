//! webrtc-rs backed native peer

use super::connection::{
    IceCandidate, NativePeer, PeerBackend, PeerConnectionState, PeerEvent, PeerEventHandler,
    SdpType, SessionDescription,
};
use crate::config::IceServer;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Opus packet carrying 20 ms of silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// Builds [`RtcPeer`]s from one shared webrtc-rs API instance
pub struct RtcPeerBackend {
    api: API,
    silence: bool,
}

impl RtcPeerBackend {
    /// Create a backend with default codecs and interceptors
    pub fn new() -> Result<Self> {
        Self::build(SettingEngine::default())
    }

    /// Backend whose peers also gather loopback candidates
    ///
    /// For calls between two peers on the same host.
    pub fn for_loopback() -> Result<Self> {
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(true);
        Self::build(setting_engine)
    }

    fn build(setting_engine: SettingEngine) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self {
            api,
            silence: false,
        })
    }

    /// Keep live audio tracks flowing with Opus silence frames
    ///
    /// Without media the remote side never sees its track event.
    pub fn with_silence(mut self, enabled: bool) -> Self {
        self.silence = enabled;
        self
    }
}

#[async_trait]
impl PeerBackend for RtcPeerBackend {
    #[instrument(skip_all, fields(servers = ice_servers.len()))]
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventHandler,
    ) -> Result<Arc<dyn NativePeer>> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        register_callbacks(&pc, events);

        info!("Created native peer connection");

        Ok(Arc::new(RtcPeer {
            pc,
            tracks: RwLock::new(HashMap::new()),
            senders: RwLock::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
            silence: self.silence,
        }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, events: PeerEventHandler) {
    let on_track = Arc::clone(&events);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let events = Arc::clone(&on_track);
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        debug!(kind = %other, "Ignoring remote track of unknown kind");
                        return;
                    }
                };

                let remote = RemoteTrack::new(track.id(), track.stream_id(), kind);

                // Drain RTP so the receive path keeps its buffers empty
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!(track_id = %track.id(), "Remote track ended");
                });

                events(PeerEvent::Track(remote)).await;
            })
        },
    ));

    let on_candidate = Arc::clone(&events);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = Arc::clone(&on_candidate);
        Box::pin(async move {
            let candidate = match candidate.map(|c| c.to_json()).transpose() {
                Ok(candidate) => candidate.map(from_rtc_candidate),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize local ICE candidate");
                    return;
                }
            };
            events(PeerEvent::IceCandidate(candidate)).await;
        })
    }));

    let on_state = events;
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let events = Arc::clone(&on_state);
        Box::pin(async move {
            if let Some(state) = from_rtc_state(s) {
                events(PeerEvent::ConnectionStateChange(state)).await;
            }
        })
    }));
}

/// [`NativePeer`] over a webrtc-rs `RTCPeerConnection`
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    tracks: RwLock<HashMap<String, Arc<TrackLocalStaticSample>>>,
    /// Retained so the transceivers keep their tracks
    senders: RwLock<Vec<Arc<RTCRtpSender>>>,
    closed: Arc<AtomicBool>,
    silence: bool,
}

impl RtcPeer {
    /// Outbound sample track registered for local track `id`
    pub async fn sample_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.read().await.get(id).cloned()
    }

    fn spawn_silence(&self, local: LocalTrack, track: Arc<TrackLocalStaticSample>) {
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OPUS_FRAME);
            while local.is_live() && !closed.load(Ordering::SeqCst) {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: OPUS_FRAME,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!(track_id = %local.id(), error = %e, "Silence writer stopped");
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl NativePeer for RtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };

        let sample_track = Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            track.stream_id().to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        self.senders.write().await.push(sender);
        self.tracks
            .write()
            .await
            .insert(track.id().to_string(), Arc::clone(&sample_track));

        if self.silence && track.kind() == TrackKind::Audio {
            self.spawn_silence(track.clone(), sample_track);
        }

        debug!(track_id = %track.id(), kind = %track.kind(), "Local track added");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.pc.local_description().await?;
        from_rtc_description(description).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn connection_state(&self) -> PeerConnectionState {
        from_rtc_state(self.pc.connection_state()).unwrap_or(PeerConnectionState::New)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing native peer connection");
        self.senders.write().await.clear();
        self.tracks.write().await.clear();

        self.pc.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    #[allow(clippy::needless_update)]
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            return Ok(rollback);
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse session description: {}", e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::SdpError(
                "Session description has no type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn from_rtc_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
