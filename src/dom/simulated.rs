//! In-memory page used to drive the recorder and executor without a browser.

use crate::dom::query::{CssSelector, QueryTree, XPath};
use crate::dom::{DomEventKind, NodeHandle, NodeInfo, Observed, Page, PageEvent, QueryError, Rect};
use crate::error::{Result, TaskTapeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Replay-side operations performed on the page, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOp {
    Dispatched { node: NodeHandle, kind: DomEventKind },
    ValueSet { node: NodeHandle, value: String },
    ScrolledTo { x: f64, y: f64 },
    Navigated(String),
    WentBack,
    Reloaded,
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    parent: Option<usize>,
    children: Vec<usize>,
    value: String,
    rect: Rect,
}

impl Element {
    fn new(tag: &str, parent: Option<usize>) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            parent,
            children: Vec::new(),
            value: String::new(),
            rect: Rect::default(),
        }
    }
}

#[derive(Debug)]
struct DomState {
    nodes: Vec<Element>,
    url: String,
    history: Vec<String>,
    scroll: (f64, f64),
    journal: Vec<PageOp>,
}

impl QueryTree for DomState {
    fn root(&self) -> usize {
        0
    }

    fn tag(&self, node: usize) -> &str {
        &self.nodes[node].tag
    }

    fn attr(&self, node: usize, name: &str) -> Option<&str> {
        self.nodes[node].attrs.get(name).map(String::as_str)
    }

    fn parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }

    fn children(&self, node: usize) -> &[usize] {
        &self.nodes[node].children
    }
}

pub struct SimulatedPage {
    inner: Mutex<DomState>,
    events: broadcast::Sender<Observed>,
}

fn handle(index: usize) -> NodeHandle {
    NodeHandle::new(format!("sim-{}", index))
}

impl SimulatedPage {
    /// A page holding an empty `<html><body></body></html>` document.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut html = Element::new("html", None);
        html.children.push(1);
        let body = Element::new("body", Some(0));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(DomState {
                nodes: vec![html, body],
                url: url.clone(),
                history: vec![url],
                scroll: (0.0, 0.0),
                journal: Vec::new(),
            }),
            events,
        }
    }

    pub fn body(&self) -> NodeHandle {
        handle(1)
    }

    fn index(&self, node: &NodeHandle) -> Result<usize> {
        let len = self.inner.lock().nodes.len();
        node.as_str()
            .strip_prefix("sim-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n < len)
            .ok_or_else(|| TaskTapeError::Page(format!("unknown node {}", node.as_str())))
    }

    /// Append a child element with the given attributes.
    pub fn append(&self, parent: &NodeHandle, tag: &str, attrs: &[(&str, &str)]) -> Result<NodeHandle> {
        let parent_idx = self.index(parent)?;
        let mut dom = self.inner.lock();
        let idx = dom.nodes.len();
        let mut element = Element::new(tag, Some(parent_idx));
        for (name, value) in attrs {
            element.attrs.insert(name.to_string(), value.to_string());
        }
        dom.nodes.push(element);
        dom.nodes[parent_idx].children.push(idx);
        Ok(handle(idx))
    }

    pub fn set_attr(&self, node: &NodeHandle, name: &str, value: &str) -> Result<()> {
        let idx = self.index(node)?;
        self.inner.lock().nodes[idx]
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn set_rect(&self, node: &NodeHandle, rect: Rect) -> Result<()> {
        let idx = self.index(node)?;
        self.inner.lock().nodes[idx].rect = rect;
        Ok(())
    }

    /// Detach an element (and its subtree) from the document.
    pub fn remove(&self, node: &NodeHandle) -> Result<()> {
        let idx = self.index(node)?;
        let mut dom = self.inner.lock();
        if let Some(parent) = dom.nodes[idx].parent.take() {
            dom.nodes[parent].children.retain(|c| *c != idx);
        }
        Ok(())
    }

    pub fn value_of(&self, node: &NodeHandle) -> Option<String> {
        let idx = self.index(node).ok()?;
        Some(self.inner.lock().nodes[idx].value.clone())
    }

    pub fn journal(&self) -> Vec<PageOp> {
        self.inner.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    fn emit(&self, event: PageEvent) {
        let _ = self.events.send(Observed::now(event));
    }

    // -- user simulation -----------------------------------------------------

    pub fn user_click(&self, node: &NodeHandle, client_x: f64, client_y: f64) {
        self.emit(PageEvent::Click {
            target: node.clone(),
            client_x,
            client_y,
        });
    }

    /// Set the field's value as typing would, then raise an input event.
    pub fn user_type(&self, node: &NodeHandle, value: &str) -> Result<()> {
        let idx = self.index(node)?;
        self.inner.lock().nodes[idx].value = value.to_string();
        self.emit(PageEvent::Input {
            target: node.clone(),
            value: value.to_string(),
        });
        Ok(())
    }

    pub fn user_scroll(&self, x: f64, y: f64) {
        self.inner.lock().scroll = (x, y);
        self.emit(PageEvent::Scroll);
    }

    /// Client-side route change: URL updates and the document mutates.
    pub fn push_state(&self, url: &str) {
        {
            let mut dom = self.inner.lock();
            dom.url = url.to_string();
            dom.history.push(url.to_string());
        }
        self.emit(PageEvent::Mutation);
    }

    pub fn user_back(&self) {
        {
            let mut dom = self.inner.lock();
            if dom.history.len() > 1 {
                dom.history.pop();
            }
            if let Some(previous) = dom.history.last().cloned() {
                dom.url = previous;
            }
        }
        self.emit(PageEvent::HistoryBack);
        self.emit(PageEvent::Mutation);
    }
}

fn accepts_text(element: &Element) -> bool {
    match element.tag.as_str() {
        "textarea" => true,
        "input" => !matches!(
            element.attrs.get("type").map(String::as_str),
            Some("checkbox" | "radio" | "button" | "submit" | "reset" | "file" | "image" | "hidden")
        ),
        _ => false,
    }
}

#[async_trait]
impl Page for SimulatedPage {
    async fn query_selector(&self, selector: &str) -> std::result::Result<Option<NodeHandle>, QueryError> {
        let parsed = CssSelector::parse(selector)?;
        let dom = self.inner.lock();
        Ok(parsed.select_all(&*dom).into_iter().next().map(handle))
    }

    async fn count_matches(&self, selector: &str) -> std::result::Result<usize, QueryError> {
        let parsed = CssSelector::parse(selector)?;
        let dom = self.inner.lock();
        Ok(parsed.select_all(&*dom).len())
    }

    async fn evaluate_xpath(&self, expr: &str) -> std::result::Result<Option<NodeHandle>, QueryError> {
        let parsed = XPath::parse(expr)?;
        let dom = self.inner.lock();
        Ok(parsed.select_first(&*dom).map(handle))
    }

    async fn describe(&self, node: &NodeHandle) -> Result<NodeInfo> {
        let idx = self.index(node)?;
        let dom = self.inner.lock();
        let element = &dom.nodes[idx];

        let (same_tag_siblings, same_tag_index) = match element.parent {
            Some(parent) => {
                let same: Vec<usize> = dom.nodes[parent]
                    .children
                    .iter()
                    .copied()
                    .filter(|c| dom.nodes[*c].tag == element.tag)
                    .collect();
                let position = same.iter().position(|c| *c == idx).map(|i| i + 1).unwrap_or(1);
                (same.len(), position)
            }
            None => (1, 1),
        };

        Ok(NodeInfo {
            tag: element.tag.clone(),
            id: element.attrs.get("id").filter(|v| !v.is_empty()).cloned(),
            classes: element
                .attrs
                .get("class")
                .map(|c| c.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            parent: element.parent.map(handle),
            same_tag_siblings,
            same_tag_index,
            accepts_text: accepts_text(element),
            rect: element.rect,
        })
    }

    async fn dispatch_event(&self, node: &NodeHandle, kind: DomEventKind) -> Result<()> {
        self.index(node)?;
        self.inner.lock().journal.push(PageOp::Dispatched {
            node: node.clone(),
            kind,
        });
        Ok(())
    }

    async fn set_value(&self, node: &NodeHandle, value: &str) -> Result<()> {
        let idx = self.index(node)?;
        let mut dom = self.inner.lock();
        dom.nodes[idx].value = value.to_string();
        dom.journal.push(PageOp::ValueSet {
            node: node.clone(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.inner.lock().url.clone())
    }

    async fn scroll_offset(&self) -> Result<(f64, f64)> {
        Ok(self.inner.lock().scroll)
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<()> {
        let mut dom = self.inner.lock();
        dom.scroll = (x, y);
        dom.journal.push(PageOp::ScrolledTo { x, y });
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut dom = self.inner.lock();
        dom.url = url.to_string();
        dom.history.push(url.to_string());
        dom.journal.push(PageOp::Navigated(url.to_string()));
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        let mut dom = self.inner.lock();
        if dom.history.len() > 1 {
            dom.history.pop();
        }
        if let Some(previous) = dom.history.last().cloned() {
            dom.url = previous;
        }
        dom.journal.push(PageOp::WentBack);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.inner.lock().journal.push(PageOp::Reloaded);
        Ok(())
    }

    fn observe(&self) -> broadcast::Receiver<Observed> {
        self.events.subscribe()
    }
}
