//! Per-page recorder: turns raw page events into actions.
//!
//! Event handling never waits on the coordinator. Accepted actions go onto an
//! unbounded queue drained by a single forwarder task, which attaches a
//! screenshot and sends `CaptureAction` in the order the actions were taken.

use crate::dom::{derive_ref, next_order, Observed, Page, PageEvent};
use crate::error::TaskTapeError;
use crate::recording::coordinator::{CoordinatorHandle, RecorderSignal};
use crate::recording::schema::{now_ms, Action, ActionKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Input events within this window of the last accepted one are dropped.
pub const INPUT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Scroll events within this window of the last accepted one are dropped.
pub const SCROLL_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    Idle,
    Recording,
}

pub struct Recorder {
    page: Arc<dyn Page>,
    coordinator: CoordinatorHandle,
    mode: RecorderMode,
    last_url: Option<String>,
    last_input: Option<Instant>,
    last_scroll: Option<Instant>,
    last_timestamp: u64,
    /// Page events stamped before this predate the current recording.
    since: u64,
    outbox: mpsc::UnboundedSender<Action>,
}

impl Recorder {
    /// Create an idle recorder and start its forwarder task.
    pub fn new(page: Arc<dyn Page>, coordinator: CoordinatorHandle) -> Self {
        let (outbox, queue) = mpsc::unbounded_channel();
        tokio::spawn(forward(coordinator.clone(), queue));
        Self {
            page,
            coordinator,
            mode: RecorderMode::Idle,
            last_url: None,
            last_input: None,
            last_scroll: None,
            last_timestamp: 0,
            since: 0,
            outbox,
        }
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    pub async fn start(&mut self) {
        self.last_url = match self.page.current_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Could not read page URL at recording start: {}", e);
                None
            }
        };
        self.last_input = None;
        self.last_scroll = None;
        self.mode = RecorderMode::Recording;
        tracing::debug!("Recorder started at {:?}", self.last_url);
    }

    pub fn stop(&mut self) {
        self.mode = RecorderMode::Idle;
        tracing::debug!("Recorder stopped");
    }

    /// Process one page event. Events outside `Recording` are ignored.
    pub async fn handle_event(&mut self, event: PageEvent) {
        if self.mode != RecorderMode::Recording {
            return;
        }

        match event {
            PageEvent::Click {
                target,
                client_x,
                client_y,
            } => match derive_ref(self.page.as_ref(), &target).await {
                Ok(element) => self.emit(ActionKind::Click {
                    element,
                    x: client_x,
                    y: client_y,
                }),
                Err(e) => tracing::debug!("Dropping click on {}: {}", target.as_str(), e),
            },
            PageEvent::Input { target, value } => {
                let (element, info) = match (
                    derive_ref(self.page.as_ref(), &target).await,
                    self.page.describe(&target).await,
                ) {
                    (Ok(element), Ok(info)) => (element, info),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::debug!("Dropping input on {}: {}", target.as_str(), e);
                        return;
                    }
                };
                if !accept(&mut self.last_input, INPUT_DEBOUNCE) {
                    tracing::trace!("Input on {} debounced", target.as_str());
                    return;
                }
                let (x, y) = info.rect.center();
                self.emit(ActionKind::Write {
                    text: value,
                    element,
                    x,
                    y,
                });
            }
            PageEvent::Scroll => match self.page.scroll_offset().await {
                Ok((x, y)) => {
                    if accept(&mut self.last_scroll, SCROLL_DEBOUNCE) {
                        self.emit(ActionKind::Scroll { x, y });
                    }
                }
                Err(e) => tracing::debug!("Dropping scroll: {}", e),
            },
            PageEvent::Mutation => match self.page.current_url().await {
                Ok(url) if self.last_url.as_deref() != Some(url.as_str()) => {
                    self.last_url = Some(url.clone());
                    self.emit(ActionKind::Goto { url });
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("URL check failed: {}", e),
            },
            PageEvent::HistoryBack => self.emit(ActionKind::GoBack),
        }
    }

    fn emit(&mut self, kind: ActionKind) {
        // Clamp so a wall clock step backwards cannot reorder timestamps.
        let timestamp = now_ms().max(self.last_timestamp);
        self.last_timestamp = timestamp;
        tracing::debug!("Recorded {} at {}", kind.name(), timestamp);
        if self.outbox.send(Action::new(kind, timestamp)).is_err() {
            tracing::warn!("Action forwarder is gone; action dropped");
        }
    }

    /// Subscribe to the page and drive the recorder on its own task.
    pub fn spawn(self, signals: broadcast::Receiver<RecorderSignal>) -> JoinHandle<()> {
        let events = self.page.observe();
        tokio::spawn(self.run(events, signals))
    }

    /// Handle an event from the page stream, skipping anything emitted
    /// before the current recording began.
    async fn handle_observed(&mut self, observed: Observed) {
        if observed.order < self.since {
            tracing::trace!("Skipping event from before recording start");
            return;
        }
        self.handle_event(observed.event).await;
    }

    async fn run(
        mut self,
        mut events: broadcast::Receiver<Observed>,
        mut signals: broadcast::Receiver<RecorderSignal>,
    ) {
        let joined = next_order();
        match self.coordinator.state().await {
            Ok(state) if state.is_recording => {
                tracing::info!("Recording already in progress, recorder joining it");
                self.start().await;
                self.since = joined;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read recording state: {}", e),
        }

        loop {
            tokio::select! {
                biased;
                signal = signals.recv() => match signal {
                    Ok(RecorderSignal::Start { order }) => {
                        self.start().await;
                        self.since = order;
                    }
                    Ok(RecorderSignal::Stop) => self.stop(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Recorder missed {} coordinator signals", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(observed) => self.handle_observed(observed).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Recorder missed {} page events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Recorder loop finished");
    }
}

/// Debounce gate: true (and restarts the window) when `last` is unset or
/// `window` has elapsed since it.
fn accept(last: &mut Option<Instant>, window: Duration) -> bool {
    let now = Instant::now();
    match *last {
        Some(prev) if now.duration_since(prev) < window => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

async fn forward(coordinator: CoordinatorHandle, mut queue: mpsc::UnboundedReceiver<Action>) {
    while let Some(mut action) = queue.recv().await {
        if let Some(shot) = coordinator.capture_screenshot().await {
            action.screenshot = Some(shot);
        }
        match coordinator.capture_action(action).await {
            Ok(()) => {}
            Err(TaskTapeError::NotRecording) => {
                tracing::debug!("Late capture after stop discarded");
            }
            Err(e) => tracing::warn!("Failed to forward action: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{NodeHandle, SimulatedPage};
    use crate::error::Result;
    use crate::recording::coordinator::{Coordinator, ScreenshotSource};
    use crate::recording::schema::{ElementRef, RecordingSequence, Task, TaskSource};
    use crate::recording::store::{SequenceStore, StateStore, Storage};
    use async_trait::async_trait;

    struct Camera(Option<&'static str>);

    #[async_trait]
    impl ScreenshotSource for Camera {
        async fn capture_visible(&self) -> Result<Option<String>> {
            match self.0 {
                Some(shot) => Ok(Some(shot.to_string())),
                None => Err(TaskTapeError::Page("capture failed".to_string())),
            }
        }
    }

    async fn coordinator_with(
        dir: &std::path::Path,
        screenshots: Option<Arc<dyn ScreenshotSource>>,
    ) -> CoordinatorHandle {
        let storage = Storage::new(dir);
        Coordinator::load(
            StateStore::new(storage.clone()),
            SequenceStore::new(storage),
            screenshots,
        )
        .await
        .spawn()
    }

    async fn coordinator(dir: &std::path::Path) -> CoordinatorHandle {
        coordinator_with(dir, None).await
    }

    async fn captured(handle: &CoordinatorHandle, expected: usize) -> RecordingSequence {
        for _ in 0..100 {
            let state = handle.state().await.unwrap();
            if let Some(seq) = state.current_sequence {
                if seq.actions.len() >= expected {
                    return seq;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} captured actions", expected);
    }

    #[test]
    fn test_debounce_gate() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let mut last = None;
            assert!(accept(&mut last, SCROLL_DEBOUNCE));
            tokio::time::advance(Duration::from_millis(299)).await;
            assert!(!accept(&mut last, SCROLL_DEBOUNCE));
            tokio::time::advance(Duration::from_millis(1)).await;
            assert!(accept(&mut last, SCROLL_DEBOUNCE));
        });
    }

    #[tokio::test]
    async fn test_idle_recorder_ignores_events() {
        let dir = tempfile::tempdir().unwrap();
        let handle = coordinator(dir.path()).await;
        let page = Arc::new(SimulatedPage::new("https://example.com"));
        let button = page.append(&page.body(), "button", &[("id", "go")]).unwrap();

        let mut recorder = Recorder::new(page.clone(), handle.clone());
        assert_eq!(recorder.mode(), RecorderMode::Idle);
        recorder
            .handle_event(PageEvent::Click {
                target: button,
                client_x: 1.0,
                client_y: 1.0,
            })
            .await;

        handle
            .start_recording(Task::new("t", TaskSource::Database), "https://example.com")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = handle.state().await.unwrap();
        assert!(state.current_sequence.unwrap().actions.is_empty());
    }

    #[tokio::test]
    async fn test_scroll_and_navigation_actions() {
        let dir = tempfile::tempdir().unwrap();
        let handle = coordinator(dir.path()).await;
        let page = Arc::new(SimulatedPage::new("https://app.example/home"));
        handle
            .start_recording(Task::new("browse", TaskSource::Llm), "https://app.example/home")
            .await
            .unwrap();

        let mut recorder = Recorder::new(page.clone(), handle.clone());
        recorder.start().await;

        page.user_scroll(0.0, 400.0);
        recorder.handle_event(PageEvent::Scroll).await;
        page.user_scroll(0.0, 800.0);
        recorder.handle_event(PageEvent::Scroll).await;

        // Same URL: no Goto.
        recorder.handle_event(PageEvent::Mutation).await;
        page.push_state("https://app.example/settings");
        recorder.handle_event(PageEvent::Mutation).await;
        recorder.handle_event(PageEvent::HistoryBack).await;

        let seq = captured(&handle, 3).await;
        let kinds: Vec<ActionKind> = seq.actions.into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Scroll { x: 0.0, y: 400.0 },
                ActionKind::Goto {
                    url: "https://app.example/settings".to_string()
                },
                ActionKind::GoBack,
            ]
        );
    }

    #[tokio::test]
    async fn test_write_uses_element_center() {
        let dir = tempfile::tempdir().unwrap();
        let handle = coordinator(dir.path()).await;
        let page = Arc::new(SimulatedPage::new("https://example.com"));
        let field = page.append(&page.body(), "textarea", &[("id", "bio")]).unwrap();
        page.set_rect(&field, crate::dom::Rect::new(10.0, 20.0, 200.0, 40.0))
            .unwrap();
        handle
            .start_recording(Task::new("profile", TaskSource::Database), "https://example.com")
            .await
            .unwrap();

        let mut recorder = Recorder::new(page.clone(), handle.clone());
        recorder.start().await;
        recorder
            .handle_event(PageEvent::Input {
                target: field,
                value: "hello".to_string(),
            })
            .await;

        let seq = captured(&handle, 1).await;
        assert_eq!(
            seq.actions[0].kind,
            ActionKind::Write {
                text: "hello".to_string(),
                element: ElementRef::from("#bio"),
                x: 110.0,
                y: 40.0,
            }
        );
        assert!(seq.actions[0].screenshot.is_none());
    }

    #[tokio::test]
    async fn test_click_before_start_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let handle = coordinator(dir.path()).await;
        let page = Arc::new(SimulatedPage::new("https://example.com"));
        let early = page.append(&page.body(), "button", &[("id", "early")]).unwrap();
        let late = page.append(&page.body(), "button", &[("id", "late")]).unwrap();

        let recorder = Recorder::new(page.clone(), handle.clone()).spawn(handle.subscribe_signals());
        page.user_click(&early, 1.0, 1.0);
        handle
            .start_recording(Task::new("t", TaskSource::Database), "https://example.com")
            .await
            .unwrap();
        page.user_click(&late, 2.0, 2.0);

        captured(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        recorder.abort();

        let seq = handle.state().await.unwrap().current_sequence.unwrap();
        let kinds: Vec<ActionKind> = seq.actions.into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Click {
                element: ElementRef::from("#late"),
                x: 2.0,
                y: 2.0,
            }]
        );
    }

    #[tokio::test]
    async fn test_forwarded_actions_carry_screenshots() {
        let page = Arc::new(SimulatedPage::new("https://example.com"));
        let button = page.append(&page.body(), "button", &[("id", "go")]).unwrap();

        for (source, expected) in [(Camera(Some("img")), Some("img")), (Camera(None), None)] {
            let dir = tempfile::tempdir().unwrap();
            let handle = coordinator_with(dir.path(), Some(Arc::new(source))).await;
            handle
                .start_recording(Task::new("t", TaskSource::Llm), "https://example.com")
                .await
                .unwrap();

            let mut recorder = Recorder::new(page.clone(), handle.clone());
            recorder.start().await;
            recorder
                .handle_event(PageEvent::Click {
                    target: button.clone(),
                    client_x: 5.0,
                    client_y: 6.0,
                })
                .await;

            let seq = captured(&handle, 1).await;
            assert_eq!(seq.actions[0].screenshot.as_deref(), expected);
        }
    }

    #[tokio::test]
    async fn test_failed_input_lookup_keeps_debounce_window_open() {
        let dir = tempfile::tempdir().unwrap();
        let handle = coordinator(dir.path()).await;
        let page = Arc::new(SimulatedPage::new("https://example.com"));
        let field = page.append(&page.body(), "input", &[("id", "q")]).unwrap();
        handle
            .start_recording(Task::new("search", TaskSource::Database), "https://example.com")
            .await
            .unwrap();

        let mut recorder = Recorder::new(page.clone(), handle.clone());
        recorder.start().await;
        recorder
            .handle_event(PageEvent::Input {
                target: NodeHandle::new("sim-999"),
                value: "lost".to_string(),
            })
            .await;
        recorder
            .handle_event(PageEvent::Input {
                target: field,
                value: "rust".to_string(),
            })
            .await;

        let seq = captured(&handle, 1).await;
        assert!(matches!(
            &seq.actions[0].kind,
            ActionKind::Write { text, .. } if text == "rust"
        ));
    }
}
