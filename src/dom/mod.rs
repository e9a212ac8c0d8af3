//! Page capability: the DOM/page operations recording and replay depend on.
//!
//! Recorder and executor never touch host globals directly; they get an
//! `Arc<dyn Page>` so the same code runs against Chrome (see
//! [`crate::browser::CdpPage`]) or the in-memory [`SimulatedPage`].

pub mod query;
pub mod resolver;
pub mod simulated;

pub use resolver::{derive_ref, resolve_ref};
pub use simulated::{PageOp, SimulatedPage};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Page-scoped handle to a live element. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

/// Snapshot of the element facts selector derivation and replay need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Lower-case tag name.
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub parent: Option<NodeHandle>,
    /// Children of the parent sharing this tag (including this node).
    pub same_tag_siblings: usize,
    /// 1-based position among those siblings.
    pub same_tag_index: usize,
    /// Whether the element can hold typed text (input, textarea).
    pub accepts_text: bool,
    pub rect: Rect,
}

/// Synthetic events replay raises on an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEventKind {
    Click,
    Input,
    Change,
}

impl DomEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomEventKind::Click => "click",
            DomEventKind::Input => "input",
            DomEventKind::Change => "change",
        }
    }
}

/// Raw events observed on a live page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Click {
        target: NodeHandle,
        client_x: f64,
        client_y: f64,
    },
    Input {
        target: NodeHandle,
        value: String,
    },
    Scroll,
    /// Document subtree changed; the recorder re-checks the URL.
    Mutation,
    HistoryBack,
}

static EVENT_ORDER: AtomicU64 = AtomicU64::new(1);

/// Next stamp in the process-wide order shared by page events and
/// recorder signals.
pub fn next_order() -> u64 {
    EVENT_ORDER.fetch_add(1, Ordering::SeqCst)
}

/// A page event stamped with when it was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub order: u64,
    pub event: PageEvent,
}

impl Observed {
    pub fn now(event: PageEvent) -> Self {
        Self {
            order: next_order(),
            event,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("page error: {0}")]
    Page(String),
}

/// Injected page capability.
#[async_trait]
pub trait Page: Send + Sync {
    /// First element matching a CSS selector.
    async fn query_selector(&self, selector: &str) -> std::result::Result<Option<NodeHandle>, QueryError>;

    /// Number of elements matching a CSS selector.
    async fn count_matches(&self, selector: &str) -> std::result::Result<usize, QueryError>;

    /// First node of an XPath expression, in document order.
    async fn evaluate_xpath(&self, expr: &str) -> std::result::Result<Option<NodeHandle>, QueryError>;

    async fn describe(&self, node: &NodeHandle) -> Result<NodeInfo>;

    async fn dispatch_event(&self, node: &NodeHandle, kind: DomEventKind) -> Result<()>;

    async fn set_value(&self, node: &NodeHandle, value: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn scroll_offset(&self) -> Result<(f64, f64)>;

    async fn scroll_to(&self, x: f64, y: f64) -> Result<()>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn go_back(&self) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    /// Subscribe to DOM events and document mutations.
    fn observe(&self) -> broadcast::Receiver<Observed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_center() {
        let rect = Rect::new(100.0, 180.0, 40.0, 40.0);
        assert_eq!(rect.center(), (120.0, 200.0));
    }
}
