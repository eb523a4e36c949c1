//! Client hooks bound to server-rendered elements
//!
//! The host framework mounts a hook when its element enters the page, calls
//! `updated` after every server patch of the element, delivers named server
//! events through `handle_event` and calls `destroyed` when the element
//! leaves. Hooks are looked up by name in a [`HookRegistry`].

pub mod call;
pub mod element;
pub mod infinite_scroll;
pub mod moderation;

pub use call::{CallEnvironment, CallHook};
pub use element::{
    BroadcastEventSink, DomEvent, DomEventSink, Element, Selector, SharedElement,
};
pub use infinite_scroll::{CursorKind, InfiniteScrollHook, ScrollMetrics};
pub use moderation::{ActionButtonHook, ModerationAction};

use crate::signaling::PushChannel;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What a hook instance is bound to
#[derive(Clone)]
pub struct HookContext {
    pub el: SharedElement,
    /// Document root for page-wide lookups; `None` limits them to `el`
    pub page: Option<SharedElement>,
    pub channel: Arc<dyn PushChannel>,
    pub events: Arc<dyn DomEventSink>,
}

impl HookContext {
    pub fn new(
        el: SharedElement,
        channel: Arc<dyn PushChannel>,
        events: Arc<dyn DomEventSink>,
    ) -> Self {
        Self {
            el,
            page: None,
            channel,
            events,
        }
    }

    pub fn with_page(mut self, page: SharedElement) -> Self {
        self.page = Some(page);
        self
    }

    /// Root that page-wide queries run against
    pub fn document(&self) -> &SharedElement {
        self.page.as_ref().unwrap_or(&self.el)
    }
}

/// Lifecycle callbacks of a client hook
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name the hook is registered under
    fn name(&self) -> &'static str;

    /// The element entered the page
    async fn mounted(&self) -> Result<()>;

    /// The server patched the element
    async fn updated(&self) -> Result<()> {
        Ok(())
    }

    /// The element left the page
    async fn destroyed(&self) -> Result<()> {
        Ok(())
    }

    /// A server event addressed to this hook
    async fn handle_event(&self, event: &str, _payload: Value) -> Result<()> {
        debug!(hook = self.name(), event, "No handler for event");
        Ok(())
    }
}

/// Builds a hook bound to a context
pub type HookFactory = Arc<dyn Fn(HookContext) -> Result<Arc<dyn Hook>> + Send + Sync>;

/// Wrap an infallible hook constructor as a [`HookFactory`]
pub fn factory<H, F>(build: F) -> HookFactory
where
    H: Hook + 'static,
    F: Fn(HookContext) -> H + Send + Sync + 'static,
{
    Arc::new(move |ctx: HookContext| -> Result<Arc<dyn Hook>> { Ok(Arc::new(build(ctx))) })
}

/// Hook table handed to the host framework
#[derive(Clone, Default)]
pub struct HookRegistry {
    factories: BTreeMap<&'static str, HookFactory>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The application's hook table
    ///
    /// `ProfilesInfiniteScroll`, `RegisteredProfilesInfiniteScroll`,
    /// `BlockedUser`, `HiddenUser` and `WebRTC`.
    pub fn standard(call: CallEnvironment) -> Self {
        let mut registry = Self::new();

        registry.register(
            "ProfilesInfiniteScroll",
            factory(|ctx| InfiniteScrollHook::new(ctx, CursorKind::LastActive)),
        );
        registry.register(
            "RegisteredProfilesInfiniteScroll",
            factory(|ctx| InfiniteScrollHook::new(ctx, CursorKind::InsertedAt)),
        );
        registry.register(
            "BlockedUser",
            factory(|ctx| ActionButtonHook::new(ctx, ModerationAction::Block)),
        );
        registry.register(
            "HiddenUser",
            factory(|ctx| ActionButtonHook::new(ctx, ModerationAction::Hide)),
        );
        registry.register(
            "WebRTC",
            factory(move |ctx| CallHook::new(ctx, call.clone())),
        );

        registry
    }

    /// Add or replace the factory for `name`
    pub fn register(&mut self, name: &'static str, factory: HookFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the hook registered as `name` without mounting it
    pub fn create(&self, name: &str, ctx: HookContext) -> Result<Arc<dyn Hook>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::InvalidConfig(format!("No hook registered as {}", name)))?;
        factory(ctx)
    }

    /// Build the hook registered as `name` and run its `mounted` callback
    pub async fn mount(&self, name: &str, ctx: HookContext) -> Result<Arc<dyn Hook>> {
        let hook = self.create(name, ctx)?;
        hook.mounted().await?;
        info!(hook = name, "Hook mounted");
        Ok(hook)
    }
}
