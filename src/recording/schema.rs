//! Action model: recordable actions, tasks, and the recording envelopes.

use crate::error::{Result, TaskTapeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque locator that can re-find an element on a later page load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementRef {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Variant-specific payload of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionKind {
    #[serde(rename = "REFRESH")]
    Refresh,
    #[serde(rename = "GOTO")]
    Goto { url: String },
    #[serde(rename = "GOBACK")]
    GoBack,
    #[serde(rename = "SCROLL")]
    Scroll { x: f64, y: f64 },
    #[serde(rename = "WAIT")]
    Wait {
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    #[serde(rename = "WRITE")]
    Write {
        text: String,
        element: ElementRef,
        x: f64,
        y: f64,
    },
    #[serde(rename = "CLICK")]
    Click { element: ElementRef, x: f64, y: f64 },
}

impl ActionKind {
    /// Wire tag of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Refresh => "REFRESH",
            ActionKind::Goto { .. } => "GOTO",
            ActionKind::GoBack => "GOBACK",
            ActionKind::Scroll { .. } => "SCROLL",
            ActionKind::Wait { .. } => "WAIT",
            ActionKind::Write { .. } => "WRITE",
            ActionKind::Click { .. } => "CLICK",
        }
    }
}

/// A single captured (or replayable) action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Capture time (Unix ms).
    pub timestamp: u64,
    /// Opaque encoded image reference, never inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, timestamp: u64) -> Self {
        Self {
            kind,
            timestamp,
            screenshot: None,
        }
    }

    pub fn with_screenshot(mut self, screenshot: impl Into<String>) -> Self {
        self.screenshot = Some(screenshot.into());
        self
    }
}

/// Where a task description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Llm,
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub generated_at: u64,
    pub source: TaskSource,
}

impl Task {
    pub fn new(description: impl Into<String>, source: TaskSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            generated_at: now_ms(),
            source,
        }
    }
}

/// An ordered list of actions captured for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSequence {
    pub id: String,
    pub task_id: String,
    pub task_description: String,
    pub actions: Vec<Action>,
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Starting URL.
    pub url: String,
}

impl RecordingSequence {
    /// Open a new, empty sequence for `task`.
    pub fn open(task: &Task, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task_description: task.description.clone(),
            actions: Vec::new(),
            start_time: now_ms(),
            end_time: None,
            success: None,
            url: url.into(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Append an action. Closed sequences are immutable.
    pub fn append(&mut self, action: Action) -> Result<()> {
        if !self.is_open() {
            return Err(TaskTapeError::NotRecording);
        }
        self.actions.push(action);
        Ok(())
    }

    /// Stamp end time and outcome, consuming the open sequence.
    pub fn close(mut self, success: bool) -> Self {
        self.end_time = Some(now_ms().max(self.start_time));
        self.success = Some(success);
        self
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|end| end.saturating_sub(self.start_time))
    }
}

/// Process-wide recording state, owned by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub is_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sequence: Option<RecordingSequence>,
}

impl RecordingState {
    pub fn recording(task: Task, sequence: RecordingSequence) -> Self {
        Self {
            is_recording: true,
            current_task: Some(task),
            current_sequence: Some(sequence),
        }
    }

    /// The open sequence, if actions may currently be appended.
    pub fn open_sequence_mut(&mut self) -> Option<&mut RecordingSequence> {
        if !self.is_recording {
            return None;
        }
        self.current_sequence.as_mut().filter(|s| s.is_open())
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
