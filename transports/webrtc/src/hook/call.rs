//! WebRTC call hook
//!
//! Bound to the call container. Reads `data-initiator` (JSON boolean),
//! `data-mate` and `data-me` at mount, owns one [`CallSession`] and routes
//! inbound `peer-message` events to it.

use super::element::Selector;
use super::{Hook, HookContext};
use crate::config::CallConfig;
use crate::media::{MediaSource, SlotSource};
use crate::peer::{CallSession, PeerBackend, SessionDeps};
use crate::signaling::PEER_MESSAGE_EVENT;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Native capabilities and settings shared by every call hook
#[derive(Clone)]
pub struct CallEnvironment {
    pub config: CallConfig,
    pub media: Arc<dyn MediaSource>,
    pub backend: Arc<dyn PeerBackend>,
}

impl CallEnvironment {
    pub fn new(
        config: CallConfig,
        media: Arc<dyn MediaSource>,
        backend: Arc<dyn PeerBackend>,
    ) -> Self {
        Self {
            config,
            media,
            backend,
        }
    }
}

/// Participants as declared on the element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRoles {
    pub initiator: bool,
    pub mate: Option<String>,
    pub me: Option<String>,
}

pub struct CallHook {
    ctx: HookContext,
    env: CallEnvironment,
    /// Set once by `mounted`
    mounted: OnceCell<(CallSession, CallRoles)>,
}

impl CallHook {
    pub fn new(ctx: HookContext, env: CallEnvironment) -> Self {
        Self {
            ctx,
            env,
            mounted: OnceCell::new(),
        }
    }

    /// The session, once mounted
    pub fn session(&self) -> Option<&CallSession> {
        self.mounted.get().map(|(session, _)| session)
    }

    pub fn roles(&self) -> Option<&CallRoles> {
        self.mounted.get().map(|(_, roles)| roles)
    }

    async fn read_roles(&self) -> Result<(CallRoles, Option<String>)> {
        let el = self.ctx.el.read().await;

        let initiator = el.data_json::<bool>("initiator")?;
        let roles = CallRoles {
            initiator,
            mate: el.data("mate").map(str::to_string),
            me: el.data("me").map(str::to_string),
        };

        if roles.initiator && roles.mate.is_none() {
            return Err(Error::InvalidData(
                "initiating call element is missing data-mate".to_string(),
            ));
        }

        for video in ["#local-video", "#remote-video"] {
            let selector = Selector::parse(video)?;
            if el.query_selector(&selector).is_none() {
                warn!(video, "Call element has no video element");
            }
        }

        Ok((roles, el.id().map(str::to_string)))
    }
}

#[async_trait]
impl Hook for CallHook {
    fn name(&self) -> &'static str {
        "WebRTC"
    }

    #[instrument(skip(self), fields(hook = "WebRTC"))]
    async fn mounted(&self) -> Result<()> {
        let (roles, element_id) = self.read_roles().await?;

        let deps = SessionDeps {
            channel: Arc::clone(&self.ctx.channel),
            media: Arc::clone(&self.env.media),
            backend: Arc::clone(&self.env.backend),
            events: Arc::clone(&self.ctx.events),
        };
        let mut session = CallSession::new(self.env.config.clone(), deps)?;
        if let Some(id) = element_id {
            session = session.with_event_target(id);
        }

        if let Some(mate) = &roles.mate {
            session.set_mate(mate.clone()).await;
        }

        session
            .remote_video()
            .set_stream(SlotSource::Remote(session.remote_stream()))
            .await;

        if self.mounted.set((session.clone(), roles.clone())).is_err() {
            return Err(Error::InvalidData("call hook mounted twice".to_string()));
        }

        info!(
            initiator = roles.initiator,
            mate = ?roles.mate,
            me = ?roles.me,
            "Call hook mounted"
        );

        if let (true, Some(mate)) = (roles.initiator, roles.mate.as_deref()) {
            session.connect().await?;
            session.call(mate).await?;
        }

        Ok(())
    }

    async fn destroyed(&self) -> Result<()> {
        if let Some(session) = self.session() {
            debug!("Call hook destroyed");
            session.hang_up().await;
        }
        Ok(())
    }

    async fn handle_event(&self, event: &str, payload: Value) -> Result<()> {
        if event != PEER_MESSAGE_EVENT {
            debug!(event, "Call hook ignores event");
            return Ok(());
        }

        match self.session() {
            Some(session) => session.handle_peer_message(payload).await,
            None => {
                warn!("peer-message before mount, dropping");
                Ok(())
            }
        }
    }
}
