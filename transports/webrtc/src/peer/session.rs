//! Peer connection manager
//!
//! A [`CallSession`] mediates exactly one WebRTC session between the local
//! participant and one remote participant. It owns the native peer (at most
//! one at a time), the local capture stream, the remote media aggregate and
//! the two video slots of the call UI.
//!
//! Every inbound signaling message goes through one state guard
//! ([`SessionState::admit`]) before dispatch. Native callbacks carry the
//! generation of the connection they were registered for, so events from a
//! closed or replaced connection are dropped instead of acted upon.

use super::connection::{
    IceCandidate, NativePeer, PeerBackend, PeerConnectionState, PeerEvent, PeerEventHandler,
    SessionDescription,
};
use super::state::{MessageDisposition, SessionState};
use crate::config::{CallConfig, IceServer};
use crate::hook::element::{DomEvent, DomEventSink};
use crate::media::{LocalStream, MediaSource, RemoteStream, SlotSource, VideoSlot};
use crate::signaling::{
    IceServersReply, PeerEnvelope, PushChannel, SignalMessage, ICE_SERVERS_EVENT,
    PEER_MESSAGE_EVENT,
};
use crate::{Error, Result};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Host capabilities a session runs on
#[derive(Clone)]
pub struct SessionDeps {
    pub channel: Arc<dyn PushChannel>,
    pub media: Arc<dyn MediaSource>,
    pub backend: Arc<dyn PeerBackend>,
    pub events: Arc<dyn DomEventSink>,
}

/// One call between the local participant and a remote mate
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: CallConfig,
    deps: SessionDeps,
    /// `id` of the element DOM events are dispatched from
    event_target: Option<String>,

    state: RwLock<SessionState>,
    peer: RwLock<Option<Arc<dyn NativePeer>>>,
    local_stream: RwLock<Option<LocalStream>>,
    remote_stream: Arc<RwLock<RemoteStream>>,
    local_video: VideoSlot,
    remote_video: VideoSlot,
    mate: RwLock<Option<String>>,

    /// Bumped whenever a connection is started or torn down
    generation: AtomicU64,
    /// Serializes connect / call / answer_call / receive_remote
    negotiation: Mutex<()>,
}

impl CallSession {
    /// Create an idle session
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if `config` does not validate.
    pub fn new(config: CallConfig, deps: SessionDeps) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                deps,
                event_target: None,
                state: RwLock::new(SessionState::Idle),
                peer: RwLock::new(None),
                local_stream: RwLock::new(None),
                remote_stream: Arc::new(RwLock::new(RemoteStream::new())),
                local_video: VideoSlot::new("local-video"),
                remote_video: VideoSlot::new("remote-video"),
                mate: RwLock::new(None),
                generation: AtomicU64::new(0),
                negotiation: Mutex::new(()),
            }),
        })
    }

    /// Dispatch DOM events as coming from the element with `id`
    ///
    /// Only takes effect before the session is shared.
    pub fn with_event_target(mut self, id: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.event_target = Some(id.into());
        }
        self
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Whether a native peer connection currently exists
    pub async fn has_peer(&self) -> bool {
        self.inner.peer.read().await.is_some()
    }

    /// The remote media aggregate
    pub fn remote_stream(&self) -> Arc<RwLock<RemoteStream>> {
        Arc::clone(&self.inner.remote_stream)
    }

    pub async fn remote_track_count(&self) -> usize {
        self.inner.remote_stream.read().await.len()
    }

    pub fn local_video(&self) -> &VideoSlot {
        &self.inner.local_video
    }

    pub fn remote_video(&self) -> &VideoSlot {
        &self.inner.remote_video
    }

    pub async fn mate(&self) -> Option<String> {
        self.inner.mate.read().await.clone()
    }

    /// Record the remote participant; attached to every outbound message
    pub async fn set_mate(&self, mate: impl Into<String>) {
        *self.inner.mate.write().await = Some(mate.into());
    }

    /// Acquire media and ICE servers, then build the native peer
    ///
    /// A connection that already exists is closed first. Nothing is retried:
    /// on failure the session is `Closed` and the error is returned.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let _negotiation = self.inner.negotiation.lock().await;
        self.inner.connect_locked().await
    }

    /// Offer a call to `mate` over the existing connection
    #[instrument(skip(self))]
    pub async fn call(&self, mate: &str) -> Result<()> {
        let _negotiation = self.inner.negotiation.lock().await;

        let peer = self.inner.current_peer().await.ok_or_else(|| {
            Error::PeerConnectionError("call requires a connected session".to_string())
        })?;

        self.set_mate(mate).await;

        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        self.inner
            .push_peer_message(SignalMessage::Offer(offer))
            .await?;

        self.inner.set_state(SessionState::Negotiating).await;
        info!(mate, "Offer sent");
        Ok(())
    }

    /// Accept `offer` and send back an answer
    #[instrument(skip_all)]
    pub async fn answer_call(&self, offer: SessionDescription) -> Result<()> {
        let _negotiation = self.inner.negotiation.lock().await;
        self.inner.answer_call_locked(offer).await
    }

    /// Apply a received description on the existing connection
    ///
    /// Without a connection this logs a warning and does nothing.
    #[instrument(skip_all, fields(sdp_type = %description.sdp_type))]
    pub async fn receive_remote(&self, description: SessionDescription) -> Result<()> {
        let _negotiation = self.inner.negotiation.lock().await;

        let Some(peer) = self.inner.current_peer().await else {
            warn!("No peer connection for remote description, ignoring");
            return Ok(());
        };

        peer.set_remote_description(description).await
    }

    /// Hand a remote ICE candidate to the native peer
    ///
    /// Without a connection the candidate is dropped. A rejected candidate is
    /// logged and the session continues.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) {
        self.inner.add_remote_candidate(candidate).await
    }

    /// Stop all media, detach both video slots and close the connection
    ///
    /// Calling it again (or before any `connect`) changes nothing.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Tell the mate we are leaving, then disconnect
    #[instrument(skip(self))]
    pub async fn hang_up(&self) {
        if self.has_peer().await {
            if let Err(e) = self
                .inner
                .push_peer_message(SignalMessage::Disconnect)
                .await
            {
                warn!(error = %e, "Failed to notify mate of hang up");
            }
        }
        self.disconnect().await;
    }

    /// Dispatch an inbound `peer-message` payload (`{ body }`)
    ///
    /// Malformed or unknown messages and messages the current state does not
    /// admit are logged and discarded. Only a failing `connect` triggered by
    /// an offer is returned as an error.
    pub async fn handle_peer_message(&self, payload: Value) -> Result<()> {
        let message = match PeerEnvelope::from_value(payload).and_then(|env| env.message()) {
            Ok(message) => message,
            Err(e @ Error::UnknownMessageType(_)) => {
                error!(error = %e, "Unhandled peer message type");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed peer message");
                return Ok(());
            }
        };

        let state = self.state().await;
        let has_peer = self.has_peer().await;
        if let MessageDisposition::Drop(reason) = state.admit(&message, has_peer) {
            warn!(%reason, "Dropping peer message");
            return Ok(());
        }

        debug!(message_type = message.message_type(), %state, "Peer message");

        match message {
            SignalMessage::Offer(offer) => {
                let _negotiation = self.inner.negotiation.lock().await;
                if self.inner.has_fresh_connection().await {
                    debug!("Answering on the existing connection");
                } else {
                    self.inner.connect_locked().await?;
                }
                if let Err(e) = self.inner.answer_call_locked(offer).await {
                    error!(error = %e, "Failed to answer call");
                    return Err(e);
                }
            }
            SignalMessage::Answer(answer) => {
                if let Err(e) = self.receive_remote(answer).await {
                    error!(error = %e, "Failed to apply answer");
                }
            }
            SignalMessage::IceCandidate(candidate) => {
                self.inner.add_remote_candidate(candidate).await;
            }
            SignalMessage::Disconnect => {
                info!("Mate hung up");
                self.inner.disconnect().await;
            }
        }

        Ok(())
    }
}

impl SessionInner {
    async fn current_peer(&self) -> Option<Arc<dyn NativePeer>> {
        self.peer.read().await.clone()
    }

    /// Connected and no offer/answer exchanged on it yet
    async fn has_fresh_connection(&self) -> bool {
        *self.state.read().await == SessionState::Connected && self.peer.read().await.is_some()
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        let current = *state;

        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring invalid session transition");
            return;
        }

        debug!(from = %current, to = %next, "Session state transition");
        *state = next;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn cancelled() -> Error {
        Error::PeerConnectionError("connect cancelled by disconnect".to_string())
    }

    async fn connect_locked(self: &Arc<Self>) -> Result<()> {
        let state = *self.state.read().await;
        if !state.can_connect() || self.peer.read().await.is_some() {
            info!(%state, "Replacing existing connection");
            self.teardown().await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(SessionState::Connecting).await;

        let stream = match self.deps.media.get_user_media(&self.config.media).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to acquire local media");
                self.set_state(SessionState::Closed).await;
                return Err(e);
            }
        };

        if !self.is_current(generation) {
            stream.stop_all();
            return Err(Self::cancelled());
        }

        self.local_video
            .set_stream(SlotSource::Local(stream.clone()))
            .await;
        *self.local_stream.write().await = Some(stream.clone());

        let ice_servers = match self.request_ice_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                error!(error = %e, "Failed to obtain ICE servers");
                self.teardown().await;
                return Err(e);
            }
        };

        if !self.is_current(generation) {
            return Err(Self::cancelled());
        }

        let handler = event_handler(Arc::downgrade(self), generation);
        let peer = match self.deps.backend.create_peer(&ice_servers, handler).await {
            Ok(peer) => peer,
            Err(e) => {
                error!(error = %e, "Failed to create peer connection");
                self.teardown().await;
                return Err(e);
            }
        };

        if !self.is_current(generation) {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "Failed to close abandoned peer connection");
            }
            return Err(Self::cancelled());
        }

        *self.peer.write().await = Some(Arc::clone(&peer));

        for track in stream.tracks() {
            if let Err(e) = peer.add_track(track).await {
                error!(error = %e, track_id = %track.id(), "Failed to attach local track");
                self.teardown().await;
                return Err(e);
            }
        }

        if !self.is_current(generation) {
            return Err(Self::cancelled());
        }

        self.remote_video
            .set_stream(SlotSource::Remote(Arc::clone(&self.remote_stream)))
            .await;

        if !self.is_current(generation) {
            self.remote_video.unset_stream().await;
            return Err(Self::cancelled());
        }

        self.set_state(SessionState::Connected).await;
        info!(
            ice_servers = ice_servers.len(),
            tracks = stream.tracks().len(),
            "Peer connection ready"
        );
        Ok(())
    }

    async fn request_ice_servers(&self) -> Result<Vec<IceServer>> {
        let request = self
            .deps
            .channel
            .push_event_with_reply(ICE_SERVERS_EVENT, json!({}));

        let reply = match self.config.ice_servers_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .map_err(|_| {
                    Error::OperationTimeout(format!(
                        "no ice-servers reply within {}ms",
                        timeout.as_millis()
                    ))
                })??,
            None => request.await?,
        };

        let servers = IceServersReply::from_value(reply)?.ice_servers;
        if servers.is_empty() {
            info!("Server sent no ICE servers, using fallback list");
            return Ok(self.config.fallback_ice_servers.clone());
        }

        debug!(count = servers.len(), "Received ICE servers");
        Ok(servers)
    }

    async fn answer_call_locked(&self, offer: SessionDescription) -> Result<()> {
        let peer = self.current_peer().await.ok_or_else(|| {
            Error::PeerConnectionError("answer requires a connected session".to_string())
        })?;

        peer.set_remote_description(offer).await?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;

        let description = peer.local_description().await.unwrap_or(answer);
        self.push_peer_message(SignalMessage::Answer(description))
            .await?;

        if *self.state.read().await == SessionState::Connected {
            self.set_state(SessionState::Negotiating).await;
        }
        info!("Answer sent");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        let Some(peer) = self.current_peer().await else {
            warn!("No peer connection for remote ICE candidate, dropping");
            return;
        };

        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "Remote ICE candidate rejected");
        }
    }

    async fn push_peer_message(&self, message: SignalMessage) -> Result<()> {
        let mate = self.mate.read().await.clone();
        let envelope = PeerEnvelope::new(mate, &message)?;
        self.deps
            .channel
            .push_event(PEER_MESSAGE_EVENT, envelope.to_value()?)
            .await
    }

    async fn disconnect(&self) {
        let state = *self.state.read().await;
        let idle = matches!(state, SessionState::Idle | SessionState::Closed)
            && self.peer.read().await.is_none()
            && self.local_stream.read().await.is_none();

        if idle {
            debug!(%state, "Already disconnected");
            return;
        }

        self.teardown().await;
        info!("Disconnected");
    }

    /// Release everything and move to `Closed`
    async fn teardown(&self) {
        if let Some(peer) = self.release().await {
            close_peer(peer).await;
        }

        self.remote_stream.write().await.clear();
        self.set_state(SessionState::Closed).await;
    }

    /// Invalidate the current generation, stop all media and hand back the
    /// peer that still needs closing
    async fn release(&self) -> Option<Arc<dyn NativePeer>> {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let peer = self.peer.write().await.take();

        if let Some(stream) = self.local_stream.write().await.take() {
            stream.stop_all();
        }
        self.remote_stream.read().await.stop_all();

        self.local_video.unset_stream().await;
        self.remote_video.unset_stream().await;

        peer
    }

    async fn on_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Track(track) => {
                let (track_id, kind) = (track.id().to_string(), track.kind());
                if self.remote_stream.write().await.add_track(track) {
                    info!(%track_id, %kind, "Remote track received");
                    let state = *self.state.read().await;
                    if matches!(state, SessionState::Connected | SessionState::Negotiating) {
                        self.set_state(SessionState::Active).await;
                    }
                }
            }
            PeerEvent::IceCandidate(Some(candidate)) => {
                if let Err(e) = self
                    .push_peer_message(SignalMessage::IceCandidate(candidate))
                    .await
                {
                    warn!(error = %e, "Failed to send local ICE candidate");
                }
            }
            PeerEvent::IceCandidate(None) => {
                debug!("ICE gathering complete");
            }
            PeerEvent::ConnectionStateChange(state) => {
                debug!(%state, "Peer connection state changed");
                self.deps.events.dispatch(DomEvent {
                    name: self.config.state_event_name.clone(),
                    detail: json!({ "state": state }),
                    bubbles: true,
                    target: self.event_target.clone(),
                });

                if state == PeerConnectionState::Failed {
                    warn!("Peer connection failed, session closed");
                    let peer = self.release().await;
                    self.remote_stream.write().await.clear();
                    self.set_state(SessionState::Closed).await;

                    // Closing from inside the native callback would wait on itself
                    if let Some(peer) = peer {
                        tokio::spawn(close_peer(peer));
                    }
                }
            }
        }
    }
}

async fn close_peer(peer: Arc<dyn NativePeer>) {
    if let Err(e) = peer.close().await {
        warn!(error = %e, "Failed to close peer connection");
    }
}

/// Route native events to `session` while `generation` is current
fn event_handler(session: Weak<SessionInner>, generation: u64) -> PeerEventHandler {
    Arc::new(move |event: PeerEvent| {
        let session = session.clone();
        async move {
            let Some(inner) = session.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                debug!(generation, "Dropping event from a stale connection");
                return;
            }
            inner.on_peer_event(event).await;
        }
        .boxed()
    })
}
