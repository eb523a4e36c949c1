//! Minimal DOM model seen by hooks
//!
//! An [`Element`] tree stands in for the page fragment a hook is bound to.
//! Selectors support what the hooks need: tag, `#id`, `.class` and
//! `[attr]` / `[attr='value']` compounds matched against descendants.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

/// Element shared between the host and a mounted hook
pub type SharedElement = Arc<RwLock<Element>>;

/// A DOM element with attributes, text and children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub disabled: bool,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_attr("id", id)
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Set `data-<key>`; `key` is given in attribute (kebab) form
    pub fn with_data(self, key: &str, value: impl Into<String>) -> Self {
        self.with_attr(format!("data-{}", key), value)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn into_shared(self) -> SharedElement {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Read `data-<key>`
    pub fn data(&self, key: &str) -> Option<&str> {
        self.attr(&format!("data-{}", key))
    }

    /// Read `data-<key>` or fail with `Error::InvalidData`
    pub fn require_data(&self, key: &str) -> Result<&str> {
        self.data(key).ok_or_else(|| {
            Error::InvalidData(format!(
                "<{}> is missing data-{}",
                self.tag, key
            ))
        })
    }

    /// Parse `data-<key>` as JSON
    pub fn data_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self.require_data(key)?;
        serde_json::from_str(raw)
            .map_err(|e| Error::InvalidData(format!("data-{} is not valid: {}", key, e)))
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn matches(&self, selector: &Selector) -> bool {
        selector.matches(self)
    }

    /// First descendant matching `selector`, in document order
    pub fn query_selector(&self, selector: &Selector) -> Option<&Element> {
        for child in &self.children {
            if child.matches(selector) {
                return Some(child);
            }
            if let Some(found) = child.query_selector(selector) {
                return Some(found);
            }
        }
        None
    }

    pub fn query_selector_mut(&mut self, selector: &Selector) -> Option<&mut Element> {
        for child in &mut self.children {
            if child.matches(selector) {
                return Some(child);
            }
            if let Some(found) = child.query_selector_mut(selector) {
                return Some(found);
            }
        }
        None
    }

    /// First descendant matching `selector` that is its parent's last child
    pub fn query_last_child(&self, selector: &Selector) -> Option<&Element> {
        for (i, child) in self.children.iter().enumerate() {
            if i + 1 == self.children.len() && child.matches(selector) {
                return Some(child);
            }
            if let Some(found) = child.query_last_child(selector) {
                return Some(found);
            }
        }
        None
    }
}

/// Compound selector: optional tag followed by id, class and attribute parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Selector {
    /// Parse a compound selector such as `div.profile[data-kind='x']`
    ///
    /// # Errors
    ///
    /// `Error::InvalidData` on empty input, combinators or unterminated brackets.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidData("empty selector".to_string()));
        }
        if input.contains(char::is_whitespace) || input.contains('>') {
            return Err(Error::InvalidData(format!(
                "selector combinators are not supported: {}",
                input
            )));
        }

        let mut selector = Selector::default();
        let mut rest = input;

        let tag_end = rest.find(['#', '.', '[']).unwrap_or(rest.len());
        if tag_end > 0 {
            selector.tag = Some(rest[..tag_end].to_ascii_lowercase());
        }
        rest = &rest[tag_end..];

        while let Some(first) = rest.chars().next() {
            match first {
                '#' | '.' => {
                    let body = &rest[1..];
                    let end = body.find(['#', '.', '[']).unwrap_or(body.len());
                    let name = &body[..end];
                    if name.is_empty() {
                        return Err(Error::InvalidData(format!("bad selector: {}", input)));
                    }
                    if first == '#' {
                        selector.id = Some(name.to_string());
                    } else {
                        selector.classes.push(name.to_string());
                    }
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']').ok_or_else(|| {
                        Error::InvalidData(format!("unterminated attribute selector: {}", input))
                    })?;
                    let inner = &rest[1..close];
                    let attr = match inner.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim_matches(|c| c == '\'' || c == '"');
                            (name.to_string(), Some(value.to_string()))
                        }
                        None => (inner.to_string(), None),
                    };
                    selector.attrs.push(attr);
                    rest = &rest[close + 1..];
                }
                _ => return Err(Error::InvalidData(format!("bad selector: {}", input))),
            }
        }

        Ok(selector)
    }

    /// Attribute-equality selector, e.g. `[phx-click='block']`
    pub fn attr_eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attrs: vec![(name.into(), Some(value.into()))],
            ..Default::default()
        }
    }

    /// Add an attribute-equality part
    pub fn and_attr_eq(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), Some(value.into())));
        self
    }

    pub fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !el.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| el.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| match value {
            Some(value) => el.attr(name) == Some(value.as_str()),
            None => el.attr(name).is_some(),
        })
    }
}

/// Custom DOM event dispatched from a hook's element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomEvent {
    pub name: String,
    pub detail: Value,
    pub bubbles: bool,
    /// `id` of the dispatching element, if it has one
    pub target: Option<String>,
}

/// Receiver of DOM events dispatched by hooks
pub trait DomEventSink: Send + Sync {
    fn dispatch(&self, event: DomEvent);
}

/// Fans DOM events out to any number of UI observers
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<DomEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DomEventSink for BroadcastEventSink {
    fn dispatch(&self, event: DomEvent) {
        trace!(name = %event.name, "Dispatching DOM event");
        // No subscribers is fine; nobody is looking at the page
        let _ = self.tx.send(event);
    }
}
