//! Named-event bus between a hook and its server-side view

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Bidirectional event bus provided by the host framework
///
/// Inbound server events are not pulled from the channel; the host delivers
/// them to [`crate::hook::Hook::handle_event`].
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Push a fire-and-forget event to the server
    async fn push_event(&self, event: &str, payload: Value) -> Result<()>;

    /// Push an event and wait for the server's reply
    ///
    /// No deadline is applied here; callers that need one wrap the future in
    /// `tokio::time::timeout`.
    async fn push_event_with_reply(&self, event: &str, payload: Value) -> Result<Value>;
}
