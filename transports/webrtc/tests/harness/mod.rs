//! Call session test harness
//!
//! Provides a scripted native peer stack so session behavior can be tested
//! without a network:
//! - `FakeBackend` builds `FakePeer`s and records the ICE servers it got
//! - `FakePeer` records every native call and lets tests fire peer events
//! - `TestSide` bundles a session with the channel and DOM events it talks to
//!
//! Basic usage pattern:
//!
//! 1. Build a side with `TestSide::new()` (or `with_ice_reply` / `with_media`)
//! 2. Drive the session (`connect`, `call`, `handle_peer_message`)
//! 3. Read what it pushed with `next_peer_message` / `drain_peer_messages`
//! 4. Fire native events through `side.backend.last_peer()`

#![allow(dead_code)]

use async_trait::async_trait;
use livecall_webrtc::hook::{BroadcastEventSink, DomEvent};
use livecall_webrtc::media::{DeviceMediaSource, LocalTrack, RemoteTrack, TrackKind};
use livecall_webrtc::peer::{
    IceCandidate, NativePeer, PeerBackend, PeerConnectionState, PeerEvent, PeerEventHandler,
    SessionDescription,
};
use livecall_webrtc::signaling::{
    MemoryChannel, PeerEnvelope, PushedEvent, SignalMessage, ICE_SERVERS_EVENT,
    PEER_MESSAGE_EVENT,
};
use livecall_webrtc::{CallConfig, CallSession, Error, IceServer, Result, SessionDeps};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,livecall_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Native peer that records calls instead of negotiating
pub struct FakePeer {
    pub ice_servers: Vec<IceServer>,
    events: PeerEventHandler,
    calls: Mutex<Vec<String>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    state: Mutex<PeerConnectionState>,
    closed: AtomicBool,
    close_count: AtomicUsize,
    offers: AtomicUsize,
    track_gate: Option<TrackGate>,
}

/// Holds `add_track` until the test hands out permits
#[derive(Clone)]
struct TrackGate {
    reached: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl FakePeer {
    fn new(
        ice_servers: Vec<IceServer>,
        events: PeerEventHandler,
        track_gate: Option<TrackGate>,
    ) -> Self {
        Self {
            ice_servers,
            events,
            track_gate,
            calls: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            state: Mutex::new(PeerConnectionState::New),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            offers: AtomicUsize::new(0),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Every native call in order, e.g. `set_remote:offer`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    /// Fire a native event at the session, as the platform would
    pub async fn emit(&self, event: PeerEvent) {
        if let PeerEvent::ConnectionStateChange(state) = event {
            *self.state.lock().unwrap() = state;
        }
        (self.events)(event).await;
    }

    pub async fn emit_candidate(&self, n: u32) {
        self.emit(PeerEvent::IceCandidate(Some(candidate(n)))).await;
    }

    pub async fn emit_track(&self, id: &str, kind: TrackKind) {
        self.emit(PeerEvent::Track(RemoteTrack::new(id, "remote-stream", kind)))
            .await;
    }
}

#[async_trait]
impl NativePeer for FakePeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("add_track:{}", track.kind()));
        if let Some(gate) = &self.track_gate {
            gate.reached.notify_one();
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("v=0\r\no=fake {} offer\r\n", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        if self.remote.lock().unwrap().is_none() {
            return Err(Error::SdpError("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer("v=0\r\no=fake answer\r\n"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", description.sdp_type));
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", description.sdp_type));
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_ice_candidate:{}", candidate.candidate));
        if self.remote.lock().unwrap().is_none() {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock().unwrap()
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PeerConnectionState::Closed;
        Ok(())
    }
}

/// Backend handing out [`FakePeer`]s
#[derive(Default)]
pub struct FakeBackend {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail: AtomicBool,
    track_gate: Option<TrackGate>,
}

impl FakeBackend {
    /// Backend whose peers park in `add_track`
    ///
    /// The first `Notify` fires when a track is being added; each permit
    /// added to the semaphore lets one `add_track` finish.
    pub fn gated() -> (Self, Arc<Notify>, Arc<Semaphore>) {
        let gate = TrackGate {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        };
        let reached = Arc::clone(&gate.reached);
        let release = Arc::clone(&gate.release);
        let backend = Self {
            track_gate: Some(gate),
            ..Self::default()
        };
        (backend, reached, release)
    }

    pub fn failing() -> Self {
        let backend = Self::default();
        backend.fail.store(true, Ordering::SeqCst);
        backend
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        Arc::clone(&self.peers.lock().unwrap()[index])
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        let peers = self.peers.lock().unwrap();
        Arc::clone(peers.last().expect("no peer created yet"))
    }
}

#[async_trait]
impl PeerBackend for FakeBackend {
    async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventHandler,
    ) -> Result<Arc<dyn NativePeer>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::WebRtcError("fake backend refused".to_string()));
        }
        let peer = Arc::new(FakePeer::new(
            ice_servers.to_vec(),
            events,
            self.track_gate.clone(),
        ));
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// A session wired to a memory channel, fake backend and DOM event sink
pub struct TestSide {
    pub session: CallSession,
    pub pushed: mpsc::UnboundedReceiver<PushedEvent>,
    pub backend: Arc<FakeBackend>,
    pub dom: broadcast::Receiver<DomEvent>,
}

impl TestSide {
    /// Session whose `ice-servers` request is answered with one STUN server
    pub fn new() -> Self {
        Self::with_ice_reply(json!({"ice_servers": [{"urls": "stun:stun.example.org:3478"}]}))
    }

    pub fn with_ice_reply(reply: Value) -> Self {
        let (channel, pushed) = MemoryChannel::new("test-side");
        let channel = channel.with_reply(ICE_SERVERS_EVENT, reply);
        Self::build(
            channel,
            pushed,
            DeviceMediaSource::with_default_devices(),
            Arc::new(FakeBackend::default()),
            CallConfig::default(),
        )
    }

    /// Session whose `ice-servers` request is answered by the test, if at all
    pub fn without_ice_reply(config: CallConfig) -> Self {
        let (channel, pushed) = MemoryChannel::new("test-side");
        Self::build(
            channel,
            pushed,
            DeviceMediaSource::with_default_devices(),
            Arc::new(FakeBackend::default()),
            config,
        )
    }

    pub fn with_media(media: DeviceMediaSource) -> Self {
        let (channel, pushed) = MemoryChannel::new("test-side");
        let channel = channel.with_reply(ICE_SERVERS_EVENT, json!({"ice_servers": []}));
        Self::build(
            channel,
            pushed,
            media,
            Arc::new(FakeBackend::default()),
            CallConfig::default(),
        )
    }

    pub fn with_backend(backend: FakeBackend) -> Self {
        let (channel, pushed) = MemoryChannel::new("test-side");
        let channel = channel.with_reply(ICE_SERVERS_EVENT, json!({"ice_servers": []}));
        Self::build(
            channel,
            pushed,
            DeviceMediaSource::with_default_devices(),
            Arc::new(backend),
            CallConfig::default(),
        )
    }

    fn build(
        channel: MemoryChannel,
        pushed: mpsc::UnboundedReceiver<PushedEvent>,
        media: DeviceMediaSource,
        backend: Arc<FakeBackend>,
        config: CallConfig,
    ) -> Self {
        let sink = Arc::new(BroadcastEventSink::default());
        let dom = sink.subscribe();
        let deps = SessionDeps {
            channel: Arc::new(channel),
            media: Arc::new(media),
            backend: Arc::clone(&backend) as Arc<dyn PeerBackend>,
            events: sink,
        };
        let session = CallSession::new(config, deps)
            .expect("valid config")
            .with_event_target("call");

        Self {
            session,
            pushed,
            backend,
            dom,
        }
    }

    /// Every `peer-message` pushed so far, decoded; other events are skipped
    pub fn drain_peer_messages(&mut self) -> Vec<(Option<String>, SignalMessage)> {
        let mut messages = Vec::new();
        while let Ok(pushed) = self.pushed.try_recv() {
            if let Some(message) = decode_pushed(&pushed) {
                messages.push(message);
            }
        }
        messages
    }

    /// Names of every event pushed so far, in order
    pub fn drain_event_names(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(pushed) = self.pushed.try_recv() {
            names.push(pushed.event);
        }
        names
    }
}

/// Decode a pushed `peer-message` into `(mate, message)`
pub fn decode_pushed(pushed: &PushedEvent) -> Option<(Option<String>, SignalMessage)> {
    if pushed.event != PEER_MESSAGE_EVENT {
        return None;
    }
    let envelope = PeerEnvelope::from_value(pushed.payload.clone()).expect("valid envelope");
    let message = envelope.message().expect("known message type");
    Some((envelope.mate, message))
}

/// Inbound `peer-message` payload as the server delivers it
pub fn inbound(message: &SignalMessage) -> Value {
    json!({ "body": message.to_json().expect("encodable message") })
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2122260223 192.168.1.{} 5000{} typ host", n, n, n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Next DOM event, failing the test after a second
pub async fn next_dom_event(rx: &mut broadcast::Receiver<DomEvent>) -> DomEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("DOM event in time")
        .expect("DOM sink open")
}
