//! Block / hide buttons on profile pages

use super::element::Selector;
use super::{Hook, HookContext};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Block,
    Hide,
}

impl ModerationAction {
    /// Server event confirming the action
    pub fn event(&self) -> &'static str {
        match self {
            ModerationAction::Block => "blocked",
            ModerationAction::Hide => "hidden",
        }
    }

    /// `phx-click` value of the button that triggers it
    pub fn click(&self) -> &'static str {
        match self {
            ModerationAction::Block => "block",
            ModerationAction::Hide => "hide",
        }
    }

    /// Button text once done
    pub fn label(&self) -> &'static str {
        match self {
            ModerationAction::Block => "Blocked",
            ModerationAction::Hide => "Hidden",
        }
    }
}

/// Disables the matching button when the server confirms the action
///
/// The button is looked up in the whole page when the context carries one
/// (`HookContext::with_page`), otherwise in the hook's own element.
pub struct ActionButtonHook {
    ctx: HookContext,
    action: ModerationAction,
}

impl ActionButtonHook {
    pub fn new(ctx: HookContext, action: ModerationAction) -> Self {
        Self { ctx, action }
    }
}

fn user_id(payload: &Value) -> Result<String> {
    match payload.get("user_id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(Error::InvalidData(
            "moderation event without user_id".to_string(),
        )),
    }
}

#[async_trait]
impl Hook for ActionButtonHook {
    fn name(&self) -> &'static str {
        match self.action {
            ModerationAction::Block => "BlockedUser",
            ModerationAction::Hide => "HiddenUser",
        }
    }

    async fn mounted(&self) -> Result<()> {
        debug!(hook = self.name(), "Listening for {}", self.action.event());
        Ok(())
    }

    async fn handle_event(&self, event: &str, payload: Value) -> Result<()> {
        if event != self.action.event() {
            return Ok(());
        }

        let user_id = user_id(&payload)?;
        let selector = Selector::attr_eq("phx-click", self.action.click())
            .and_attr_eq("phx-value-user-id", user_id.as_str());

        let mut el = self.ctx.document().write().await;
        match el.query_selector_mut(&selector) {
            Some(button) => {
                button.disabled = true;
                button.text = self.action.label().to_string();
                info!(hook = self.name(), %user_id, "Button updated");
            }
            None => {
                warn!(hook = self.name(), %user_id, "No button for user");
            }
        }
        Ok(())
    }
}
