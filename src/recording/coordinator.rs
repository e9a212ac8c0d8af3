//! Coordinator: the single owner of RecordingState.
//!
//! Runs as an actor. Requests arrive on an mpsc mailbox and are handled one
//! at a time, so start/capture/stop never interleave their mutations. Every
//! mutation is persisted before the reply is sent.

use crate::error::{Result, TaskTapeError};
use crate::recording::schema::{Action, RecordingSequence, RecordingState, Task};
use crate::recording::store::{SequenceStore, StateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

const MAILBOX_CAPACITY: usize = 256;
const SIGNAL_CAPACITY: usize = 16;

/// Something that can capture the currently visible page surface.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    /// Encoded image, or `None` when there is no active page to capture.
    async fn capture_visible(&self) -> Result<Option<String>>;
}

/// Mode changes the coordinator pushes to every recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderSignal {
    /// Page events stamped before `order` predate the recording.
    Start { order: u64 },
    Stop,
}

enum Request {
    Start {
        task: Task,
        url: String,
        reply: oneshot::Sender<Result<RecordingSequence>>,
    },
    Capture {
        action: Action,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        success: bool,
        reply: oneshot::Sender<Result<Option<RecordingSequence>>>,
    },
    Screenshot {
        reply: oneshot::Sender<Option<String>>,
    },
    State {
        reply: oneshot::Sender<RecordingState>,
    },
}

pub struct Coordinator {
    state: RecordingState,
    state_store: StateStore,
    sequences: SequenceStore,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    signals: broadcast::Sender<RecorderSignal>,
}

impl Coordinator {
    /// Build a coordinator, restoring whatever state was last persisted.
    pub async fn load(
        state_store: StateStore,
        sequences: SequenceStore,
        screenshots: Option<Arc<dyn ScreenshotSource>>,
    ) -> Self {
        let state = state_store.load().await;
        if state.is_recording {
            tracing::info!(
                "Resuming recording {:?} with {} captured actions",
                state.current_sequence.as_ref().map(|s| s.id.as_str()),
                state.current_sequence.as_ref().map_or(0, |s| s.actions.len())
            );
        }
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            state,
            state_store,
            sequences,
            screenshots,
            signals,
        }
    }

    /// Move the coordinator onto its own task and return a handle to it.
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let signals = self.signals.clone();
        tokio::spawn(self.run(rx));
        CoordinatorHandle { tx, signals }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Start { task, url, reply } => {
                    let _ = reply.send(self.start_recording(task, url).await);
                }
                Request::Capture { action, reply } => {
                    let _ = reply.send(self.capture_action(action).await);
                }
                Request::Stop { success, reply } => {
                    let _ = reply.send(self.stop_recording(success).await);
                }
                Request::Screenshot { reply } => {
                    // Captures never touch state, so they do not hold up the mailbox.
                    let source = self.screenshots.clone();
                    tokio::spawn(async move {
                        let _ = reply.send(capture_screenshot(source).await);
                    });
                }
                Request::State { reply } => {
                    let _ = reply.send(self.state.clone());
                }
            }
        }
        tracing::debug!("Coordinator mailbox closed");
    }

    async fn start_recording(&mut self, task: Task, url: String) -> Result<RecordingSequence> {
        if let Some(previous) = self.state.current_sequence.as_ref().filter(|s| s.is_open()) {
            tracing::warn!(
                "Discarding open sequence {} ({} actions) for new recording",
                previous.id,
                previous.actions.len()
            );
        }

        let sequence = RecordingSequence::open(&task, url);
        tracing::info!("Recording started: sequence={} task={}", sequence.id, task.id);
        self.state = RecordingState::recording(task, sequence.clone());
        self.persist().await;
        let _ = self.signals.send(RecorderSignal::Start {
            order: crate::dom::next_order(),
        });
        Ok(sequence)
    }

    async fn capture_action(&mut self, action: Action) -> Result<()> {
        let sequence = self
            .state
            .open_sequence_mut()
            .ok_or(TaskTapeError::NotRecording)?;
        tracing::debug!(
            "Captured {} #{} for sequence {}",
            action.kind.name(),
            sequence.actions.len(),
            sequence.id
        );
        sequence.append(action)?;
        self.persist().await;
        Ok(())
    }

    async fn stop_recording(&mut self, success: bool) -> Result<Option<RecordingSequence>> {
        let Some(open) = self.state.current_sequence.clone().filter(|s| s.is_open()) else {
            tracing::debug!("Stop requested with no open sequence");
            return Ok(None);
        };

        let closed = open.close(success);
        self.sequences.append(closed.clone()).await?;

        self.state = RecordingState::default();
        self.persist().await;
        let _ = self.signals.send(RecorderSignal::Stop);
        tracing::info!(
            "Recording stopped: sequence={} actions={} success={}",
            closed.id,
            closed.actions.len(),
            success
        );
        Ok(Some(closed))
    }

    /// Write state through to storage. The in-memory state stays authoritative
    /// if the write fails.
    async fn persist(&self) {
        if let Err(e) = self.state_store.save(&self.state).await {
            tracing::error!("Failed to persist recording state: {}", e);
        }
    }
}

async fn capture_screenshot(source: Option<Arc<dyn ScreenshotSource>>) -> Option<String> {
    let Some(source) = source else {
        tracing::debug!("{}", TaskTapeError::CaptureDeclined("no page attached".to_string()));
        return None;
    };
    match source.capture_visible().await {
        Ok(shot) => shot,
        Err(e) => {
            tracing::debug!("{}", TaskTapeError::CaptureDeclined(e.to_string()));
            None
        }
    }
}

/// Cloneable client of the coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
    signals: broadcast::Sender<RecorderSignal>,
}

impl CoordinatorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| TaskTapeError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| TaskTapeError::CoordinatorUnavailable)
    }

    pub async fn start_recording(&self, task: Task, url: impl Into<String>) -> Result<RecordingSequence> {
        let url = url.into();
        self.request(|reply| Request::Start { task, url, reply }).await?
    }

    pub async fn capture_action(&self, action: Action) -> Result<()> {
        self.request(|reply| Request::Capture { action, reply }).await?
    }

    pub async fn stop_recording(&self, success: bool) -> Result<Option<RecordingSequence>> {
        self.request(|reply| Request::Stop { success, reply }).await?
    }

    /// Screenshot of the active page; `None` on any failure.
    pub async fn capture_screenshot(&self) -> Option<String> {
        self.request(|reply| Request::Screenshot { reply })
            .await
            .ok()
            .flatten()
    }

    pub async fn state(&self) -> Result<RecordingState> {
        self.request(|reply| Request::State { reply }).await
    }

    /// Receive start/stop signals addressed to recorders.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<RecorderSignal> {
        self.signals.subscribe()
    }
}
