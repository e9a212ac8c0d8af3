//! Message protocol between panels, pages and the coordinator.

use crate::recording::coordinator::CoordinatorHandle;
use crate::recording::schema::{Action, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    StartRecording { task: Task, url: String },
    StopRecording { success: bool },
    CaptureAction(Action),
    CaptureScreenshot,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StartRecording { .. } => "START_RECORDING",
            Message::StopRecording { .. } => "STOP_RECORDING",
            Message::CaptureAction(_) => "CAPTURE_ACTION",
            Message::CaptureScreenshot => "CAPTURE_SCREENSHOT",
        }
    }
}

/// Reply to a [`Message`]. Serialized without a tag: `{success, error?}` or
/// `{screenshot}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageResponse {
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Screenshot {
        screenshot: Option<String>,
    },
}

impl MessageResponse {
    pub fn ok() -> Self {
        MessageResponse::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        MessageResponse::Ack {
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            MessageResponse::Ack { success, .. } => *success,
            MessageResponse::Screenshot { .. } => true,
        }
    }
}

impl CoordinatorHandle {
    /// Route a protocol message to the matching coordinator operation.
    pub async fn handle_message(&self, message: Message) -> MessageResponse {
        let kind = message.kind();
        let outcome = match message {
            Message::StartRecording { task, url } => self.start_recording(task, url).await.map(|_| ()),
            Message::StopRecording { success } => self.stop_recording(success).await.map(|_| ()),
            Message::CaptureAction(action) => self.capture_action(action).await,
            Message::CaptureScreenshot => {
                return MessageResponse::Screenshot {
                    screenshot: self.capture_screenshot().await,
                };
            }
        };

        match outcome {
            Ok(()) => MessageResponse::ok(),
            Err(e) => {
                tracing::debug!("{} rejected: {}", kind, e);
                MessageResponse::failed(e)
            }
        }
    }
}
