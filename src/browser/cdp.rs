//! Chrome DevTools Protocol page backend.
//!
//! Attaches to an already running Chrome over its remote debugging port. An
//! injected hook script keeps a registry of elements it has seen (node
//! handles are registry indices) and reports DOM events through a
//! `Runtime.addBinding` callback.

use crate::dom::{DomEventKind, NodeHandle, NodeInfo, Observed, Page, PageEvent, QueryError};
use crate::error::{Result, TaskTapeError};
use crate::recording::ScreenshotSource;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<SyncMutex<HashMap<u64, oneshot::Sender<Value>>>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 256;
const HANDLE_PREFIX: &str = "tt:";

/// Name of the binding the hook script reports through.
pub const BINDING_NAME: &str = "__tasktapeEmit";

const HOOK_SCRIPT: &str = r#"(function () {
  if (window.__tasktape) return;
  const emit = (payload) => {
    try { window.__tasktapeEmit(JSON.stringify(payload)); } catch (e) {}
  };
  const ids = new WeakMap();
  const nodes = [];
  const tt = {
    nodes,
    id(el) {
      let n = ids.get(el);
      if (n === undefined) { n = nodes.length; nodes.push(el); ids.set(el, n); }
      return n;
    },
    node(n) {
      const el = nodes[n];
      return el && el.isConnected ? el : null;
    },
  };
  window.__tasktape = tt;
  document.addEventListener('click', (e) => {
    if (e.target instanceof Element) emit({ kind: 'click', node: tt.id(e.target), x: e.clientX, y: e.clientY });
  }, true);
  document.addEventListener('input', (e) => {
    const t = e.target;
    if (t instanceof Element && 'value' in t) emit({ kind: 'input', node: tt.id(t), value: String(t.value) });
  }, true);
  window.addEventListener('scroll', () => emit({ kind: 'scroll' }), true);
  window.addEventListener('popstate', () => emit({ kind: 'popstate' }));
  const observe = () => new MutationObserver(() => emit({ kind: 'mutation' }))
    .observe(document.documentElement, { childList: true, subtree: true });
  if (document.documentElement) observe(); else document.addEventListener('DOMContentLoaded', observe);
})();"#;

/// Payload sent by the hook script through the binding.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum HookEvent {
    Click { node: u64, x: f64, y: f64 },
    Input { node: u64, value: String },
    Scroll,
    Popstate,
    Mutation,
}

fn handle_for(index: u64) -> NodeHandle {
    NodeHandle::new(format!("{}{}", HANDLE_PREFIX, index))
}

fn registry_index(node: &NodeHandle) -> Result<u64> {
    node.as_str()
        .strip_prefix(HANDLE_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| TaskTapeError::Page(format!("not a CDP node handle: {}", node.as_str())))
}

/// Translate a binding payload into a page event.
pub fn parse_binding_payload(payload: &str) -> Option<PageEvent> {
    let event = match serde_json::from_str::<HookEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("Ignoring malformed hook payload: {}", e);
            return None;
        }
    };
    Some(match event {
        HookEvent::Click { node, x, y } => PageEvent::Click {
            target: handle_for(node),
            client_x: x,
            client_y: y,
        },
        HookEvent::Input { node, value } => PageEvent::Input {
            target: handle_for(node),
            value,
        },
        HookEvent::Scroll => PageEvent::Scroll,
        HookEvent::Popstate => PageEvent::HistoryBack,
        HookEvent::Mutation => PageEvent::Mutation,
    })
}

/// Pull `result.result.value` out of a `Runtime.evaluate` response.
fn evaluated_value(response: &Value) -> Result<Value> {
    if let Some(details) = response.get("result").and_then(|r| r.get("exceptionDetails")) {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("script exception");
        return Err(TaskTapeError::Page(text.to_string()));
    }
    Ok(response
        .get("result")
        .and_then(|r| r.get("result"))
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Outcome of a selector lookup run in the page.
#[derive(Debug, Deserialize)]
struct Lookup {
    node: Option<u64>,
    count: Option<usize>,
    invalid: Option<String>,
}

impl Lookup {
    fn into_result(self) -> std::result::Result<Self, QueryError> {
        match self.invalid {
            Some(message) => Err(QueryError::InvalidSelector(message)),
            None => Ok(self),
        }
    }
}

fn literal(text: &str) -> String {
    // A JSON string is a valid JS string literal.
    Value::String(text.to_string()).to_string()
}

pub struct CdpPage {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    pending: Pending,
    next_id: AtomicU64,
    events: broadcast::Sender<Observed>,
    reader: JoinHandle<()>,
    port: u16,
}

impl CdpPage {
    /// Attach to the first page target of a Chrome listening on `port`.
    pub async fn attach(port: u16) -> Result<Self> {
        let list_url = format!("http://127.0.0.1:{}/json/list", port);
        let response = reqwest::get(&list_url)
            .await
            .map_err(|e| TaskTapeError::Transport(format!("CDP discovery failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(TaskTapeError::Transport(format!(
                "CDP discovery returned HTTP {}",
                response.status()
            )));
        }
        let targets: Value = response
            .json()
            .await
            .map_err(|e| TaskTapeError::Transport(format!("Bad target list: {}", e)))?;

        let ws_url = targets
            .as_array()
            .and_then(|arr| {
                arr.iter()
                    .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            })
            .and_then(|t| t.get("webSocketDebuggerUrl"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskTapeError::Transport("No page target found".to_string()))?
            .to_string();

        tracing::info!("Connecting to page target WebSocket: {}", ws_url);
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| TaskTapeError::Transport(format!("Failed to connect WebSocket: {}", e)))?;
        let (sink, source) = stream.split();

        let pending: Pending = Arc::new(SyncMutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let reader = tokio::spawn(read_messages(source, pending.clone(), events.clone()));

        let page = Self {
            sink: Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            events,
            reader,
            port,
        };

        page.send_command("Page.enable", json!({})).await?;
        page.send_command("Runtime.enable", json!({})).await?;
        page.send_command("Runtime.addBinding", json!({ "name": BINDING_NAME }))
            .await?;
        page.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": HOOK_SCRIPT }),
        )
        .await?;
        page.evaluate(HOOK_SCRIPT.to_string()).await?;

        tracing::info!("CDP page attached on port {}", port);
        Ok(page)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let command = json!({ "id": id, "method": method, "params": params });
        let sent = self
            .sink
            .lock()
            .await
            .send(WsMessage::Text(command.to_string()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().remove(&id);
            return Err(TaskTapeError::Transport(format!("Failed to send {}: {}", method, e)));
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TaskTapeError::Transport("CDP connection closed".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(TaskTapeError::Transport(format!("{} timed out", method)));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown CDP error");
            return Err(TaskTapeError::Page(format!("{}: {}", method, message)));
        }
        Ok(response)
    }

    async fn evaluate(&self, expression: String) -> Result<Value> {
        let response = self
            .send_command(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        evaluated_value(&response)
    }

    async fn lookup(&self, body: String) -> std::result::Result<Lookup, QueryError> {
        let expression = format!(
            "(function() {{ const tt = window.__tasktape; if (!tt) return {{ invalid: null, node: null }}; {} }})()",
            body
        );
        let value = self
            .evaluate(expression)
            .await
            .map_err(|e| QueryError::Page(e.to_string()))?;
        let lookup: Lookup =
            serde_json::from_value(value).map_err(|e| QueryError::Page(e.to_string()))?;
        lookup.into_result()
    }

    /// Run `body` with `el` bound to the registered node; false if it is gone.
    async fn with_node(&self, node: &NodeHandle, body: &str) -> Result<()> {
        let index = registry_index(node)?;
        let expression = format!(
            "(function() {{ const el = window.__tasktape && window.__tasktape.node({}); if (!el) return false; {}; return true; }})()",
            index, body
        );
        match self.evaluate(expression).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(TaskTapeError::ElementNotFound(node.as_str().to_string())),
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_messages(
    mut source: SplitStream<WsStream>,
    pending: Pending,
    events: broadcast::Sender<Observed>,
) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let Ok(json) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                    if let Some(sender) = pending.lock().remove(&id) {
                        let _ = sender.send(json);
                    }
                    continue;
                }
                if json.get("method").and_then(|m| m.as_str()) == Some("Runtime.bindingCalled") {
                    let params = &json["params"];
                    if params.get("name").and_then(|n| n.as_str()) != Some(BINDING_NAME) {
                        continue;
                    }
                    if let Some(event) = params
                        .get("payload")
                        .and_then(|p| p.as_str())
                        .and_then(parse_binding_payload)
                    {
                        let _ = events.send(Observed::now(event));
                    }
                }
            }
            Ok(WsMessage::Close(_)) => {
                tracing::debug!("CDP WebSocket closed");
                break;
            }
            Err(e) => {
                tracing::debug!("CDP WebSocket error: {:?}", e);
                break;
            }
            _ => {}
        }
    }
    // Dropping the senders wakes every waiting command.
    pending.lock().clear();
}

#[async_trait]
impl Page for CdpPage {
    async fn query_selector(&self, selector: &str) -> std::result::Result<Option<NodeHandle>, QueryError> {
        let lookup = self
            .lookup(format!(
                "let el; try {{ el = document.querySelector({}); }} catch (e) {{ return {{ invalid: String(e.message) }}; }} return {{ node: el ? tt.id(el) : null }};",
                literal(selector)
            ))
            .await?;
        Ok(lookup.node.map(handle_for))
    }

    async fn count_matches(&self, selector: &str) -> std::result::Result<usize, QueryError> {
        let lookup = self
            .lookup(format!(
                "try {{ return {{ count: document.querySelectorAll({}).length }}; }} catch (e) {{ return {{ invalid: String(e.message) }}; }}",
                literal(selector)
            ))
            .await?;
        Ok(lookup.count.unwrap_or(0))
    }

    async fn evaluate_xpath(&self, expr: &str) -> std::result::Result<Option<NodeHandle>, QueryError> {
        let lookup = self
            .lookup(format!(
                "let el; try {{ el = document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }} catch (e) {{ return {{ invalid: String(e.message) }}; }} return {{ node: el instanceof Element ? tt.id(el) : null }};",
                literal(expr)
            ))
            .await?;
        Ok(lookup.node.map(handle_for))
    }

    async fn describe(&self, node: &NodeHandle) -> Result<NodeInfo> {
        let index = registry_index(node)?;
        let expression = format!(
            r#"(function() {{
  const tt = window.__tasktape;
  const el = tt && tt.node({index});
  if (!el) return null;
  const parent = el.parentElement;
  const same = parent ? Array.from(parent.children).filter((c) => c.tagName === el.tagName) : [el];
  const r = el.getBoundingClientRect();
  const tag = el.tagName.toLowerCase();
  const blocked = ['checkbox', 'radio', 'button', 'submit', 'reset', 'file', 'image', 'hidden'];
  return {{
    tag,
    id: el.id ? el.id : null,
    classes: Array.from(el.classList),
    parent: parent ? '{prefix}' + tt.id(parent) : null,
    same_tag_siblings: same.length,
    same_tag_index: same.indexOf(el) + 1,
    accepts_text: tag === 'textarea' || (tag === 'input' && !blocked.includes(el.type)),
    rect: {{ left: r.left, top: r.top, width: r.width, height: r.height }},
  }};
}})()"#,
            index = index,
            prefix = HANDLE_PREFIX
        );
        match self.evaluate(expression).await? {
            Value::Null => Err(TaskTapeError::ElementNotFound(node.as_str().to_string())),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    async fn dispatch_event(&self, node: &NodeHandle, kind: DomEventKind) -> Result<()> {
        let event = match kind {
            DomEventKind::Click => {
                "new MouseEvent('click', { bubbles: true, cancelable: true, view: window })".to_string()
            }
            other => format!("new Event('{}', {{ bubbles: true }})", other.as_str()),
        };
        self.with_node(node, &format!("el.dispatchEvent({})", event)).await
    }

    async fn set_value(&self, node: &NodeHandle, value: &str) -> Result<()> {
        self.with_node(node, &format!("el.focus(); el.value = {}", literal(value)))
            .await
    }

    async fn current_url(&self) -> Result<String> {
        match self.evaluate("window.location.href".to_string()).await? {
            Value::String(url) => Ok(url),
            other => Err(TaskTapeError::Page(format!("unexpected location: {}", other))),
        }
    }

    async fn scroll_offset(&self) -> Result<(f64, f64)> {
        let value = self
            .evaluate("[window.scrollX, window.scrollY]".to_string())
            .await?;
        let (x, y): (f64, f64) = serde_json::from_value(value)?;
        Ok((x, y))
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<()> {
        self.evaluate(format!("window.scrollTo({}, {})", x, y)).await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.send_command("Page.navigate", json!({ "url": url })).await?;
        tracing::info!("Navigated to: {}", url);
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.evaluate("window.history.back()".to_string()).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    fn observe(&self) -> broadcast::Receiver<Observed> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ScreenshotSource for CdpPage {
    async fn capture_visible(&self) -> Result<Option<String>> {
        let response = self
            .send_command("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        Ok(response
            .get("result")
            .and_then(|r| r.get("data"))
            .and_then(|d| d.as_str())
            .map(|data| format!("data:image/png;base64,{}", data)))
    }
}
