//! Infinite scroll over profile listings
//!
//! When the window is scrolled past 90% the hook asks the server for the
//! next page with a `more` event carrying a cursor read from the last
//! rendered row. One request is in flight at a time; the server patching the
//! element (`updated`) re-arms the hook.

use super::element::Selector;
use super::{Hook, HookContext};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Event requesting the next page
pub const MORE_EVENT: &str = "more";

/// Scroll position above which the next page is requested
pub const SCROLL_THRESHOLD_PERCENT: f64 = 90.0;

/// Second cursor field, besides `user_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Listing ordered by last activity
    LastActive,
    /// Listing ordered by registration time
    InsertedAt,
}

impl CursorKind {
    /// `(cursor field, row data attribute)`
    fn field(&self) -> (&'static str, &'static str) {
        match self {
            CursorKind::LastActive => ("last_active", "cursor-last-active"),
            CursorKind::InsertedAt => ("inserted_at", "cursor-inserted-at"),
        }
    }
}

/// Window scroll geometry at the time of a scroll notification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// How far down the page is scrolled, `None` if it cannot scroll
    pub fn percent(&self) -> Option<f64> {
        let scrollable = self.scroll_height - self.client_height;
        if scrollable <= 0.0 {
            return None;
        }
        Some(self.scroll_top / scrollable * 100.0)
    }
}

pub struct InfiniteScrollHook {
    ctx: HookContext,
    kind: CursorKind,
    pending: AtomicBool,
}

impl InfiniteScrollHook {
    pub fn new(ctx: HookContext, kind: CursorKind) -> Self {
        Self {
            ctx,
            kind,
            pending: AtomicBool::new(false),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cursor built from the last row matching `data-selector`
    pub async fn cursor(&self) -> Result<Value> {
        let el = self.ctx.el.read().await;
        let raw = el.require_data("selector")?;
        let selector = Selector::parse(raw)?;

        let row = el.query_last_child(&selector).ok_or_else(|| {
            Error::InvalidData(format!("no row matches {} in the listing", raw))
        })?;

        let (field, attr) = self.kind.field();
        let mut cursor = Map::new();
        if let Some(user_id) = row.data("cursor-user-id") {
            cursor.insert("user_id".to_string(), Value::from(user_id));
        }
        if let Some(value) = row.data(attr) {
            cursor.insert(field.to_string(), Value::from(value));
        }
        Ok(Value::Object(cursor))
    }

    /// Handle a window scroll notification
    ///
    /// Returns whether a `more` request was pushed.
    pub async fn on_scroll(&self, metrics: ScrollMetrics) -> Result<bool> {
        let Some(percent) = metrics.percent() else {
            return Ok(false);
        };
        if percent <= SCROLL_THRESHOLD_PERCENT {
            return Ok(false);
        }
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        let result = match self.cursor().await {
            Ok(cursor) => {
                debug!(hook = self.name(), %cursor, "Requesting next page");
                self.ctx.channel.push_event(MORE_EVENT, cursor).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(hook = self.name(), error = %e, "Could not request next page");
            self.pending.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(true)
    }
}

#[async_trait]
impl Hook for InfiniteScrollHook {
    fn name(&self) -> &'static str {
        match self.kind {
            CursorKind::LastActive => "ProfilesInfiniteScroll",
            CursorKind::InsertedAt => "RegisteredProfilesInfiniteScroll",
        }
    }

    async fn mounted(&self) -> Result<()> {
        self.pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn updated(&self) -> Result<()> {
        self.pending.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::element::{BroadcastEventSink, Element};
    use crate::signaling::{MemoryChannel, PushedEvent};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const NEAR_BOTTOM: ScrollMetrics = ScrollMetrics {
        scroll_top: 950.0,
        scroll_height: 2000.0,
        client_height: 1000.0,
    };

    fn row(user_id: &str) -> Element {
        Element::new("div")
            .with_attr("class", "profile")
            .with_data("cursor-user-id", user_id)
            .with_data("cursor-last-active", format!("{}-active", user_id))
            .with_data("cursor-inserted-at", format!("{}-inserted", user_id))
    }

    fn listing(kind: CursorKind) -> (InfiniteScrollHook, UnboundedReceiver<PushedEvent>) {
        let el = Element::new("div")
            .with_id("profiles")
            .with_data("selector", ".profile")
            .with_child(row("u1"))
            .with_child(row("u2"));
        let (channel, rx) = MemoryChannel::new("scroll");
        let ctx = HookContext::new(
            el.into_shared(),
            Arc::new(channel),
            Arc::new(BroadcastEventSink::default()),
        );
        (InfiniteScrollHook::new(ctx, kind), rx)
    }

    #[test]
    fn test_scroll_percent() {
        assert_eq!(NEAR_BOTTOM.percent(), Some(95.0));
        let unscrollable = ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 800.0,
            client_height: 800.0,
        };
        assert_eq!(unscrollable.percent(), None);
    }

    #[tokio::test]
    async fn test_pushes_more_once_until_updated() {
        let (hook, mut rx) = listing(CursorKind::LastActive);
        hook.mounted().await.unwrap();

        assert!(hook.on_scroll(NEAR_BOTTOM).await.unwrap());
        assert!(!hook.on_scroll(NEAR_BOTTOM).await.unwrap());

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.event, MORE_EVENT);
        assert_eq!(
            pushed.payload,
            json!({"user_id": "u2", "last_active": "u2-active"})
        );
        assert!(rx.try_recv().is_err());

        hook.updated().await.unwrap();
        assert!(!hook.is_pending());
        assert!(hook.on_scroll(NEAR_BOTTOM).await.unwrap());
    }

    #[tokio::test]
    async fn test_registered_profiles_cursor() {
        let (hook, _rx) = listing(CursorKind::InsertedAt);
        assert_eq!(hook.name(), "RegisteredProfilesInfiniteScroll");
        assert_eq!(
            hook.cursor().await.unwrap(),
            json!({"user_id": "u2", "inserted_at": "u2-inserted"})
        );
    }

    #[tokio::test]
    async fn test_below_threshold_or_unscrollable_does_nothing() {
        let (hook, mut rx) = listing(CursorKind::LastActive);
        let halfway = ScrollMetrics {
            scroll_top: 500.0,
            ..NEAR_BOTTOM
        };
        assert!(!hook.on_scroll(halfway).await.unwrap());

        let flat = ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 600.0,
            client_height: 600.0,
        };
        assert!(!hook.on_scroll(flat).await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_row_clears_pending() {
        let (hook, _rx) = listing(CursorKind::LastActive);
        hook.ctx.el.write().await.children.clear();

        assert!(matches!(
            hook.on_scroll(NEAR_BOTTOM).await,
            Err(Error::InvalidData(_))
        ));
        assert!(!hook.is_pending());
    }
}
