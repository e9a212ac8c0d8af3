//! Replay executor: runs a recorded sequence against a page, one action at a time.

use crate::dom::{resolve_ref, DomEventKind, NodeHandle, Page};
use crate::error::{Result, TaskTapeError};
use crate::recording::schema::{now_ms, Action, ActionKind, ElementRef, RecordingSequence};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Pause after element and scroll actions.
pub const ACTION_SETTLE: Duration = Duration::from_millis(100);

/// Pause after navigation.
pub const NAVIGATION_SETTLE: Duration = Duration::from_millis(1000);

/// First failing action of a replay. Later actions were not attempted.
#[derive(Debug, Error)]
#[error("Replay failed at action {index} ({action}): {cause}")]
pub struct ReplayError {
    pub index: usize,
    pub action: &'static str,
    #[source]
    pub cause: TaskTapeError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub sequence_id: String,
    pub actions_replayed: usize,
    pub started_at: u64,
    pub completed_at: u64,
}

impl ReplayReport {
    pub fn duration_ms(&self) -> u64 {
        self.completed_at.saturating_sub(self.started_at)
    }
}

pub struct ReplayExecutor {
    page: Arc<dyn Page>,
}

impl ReplayExecutor {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self { page }
    }

    /// Replay every action in order, stopping at the first failure.
    pub async fn execute(&self, sequence: &RecordingSequence) -> std::result::Result<ReplayReport, ReplayError> {
        let started_at = now_ms();
        tracing::info!(
            "Replaying sequence {} ({} actions)",
            sequence.id,
            sequence.actions.len()
        );

        for (index, action) in sequence.actions.iter().enumerate() {
            if let Err(cause) = self.execute_action(action).await {
                tracing::warn!(
                    "Replay of {} aborted at action {} ({}): {}",
                    sequence.id,
                    index,
                    action.kind.name(),
                    cause
                );
                return Err(ReplayError {
                    index,
                    action: action.kind.name(),
                    cause,
                });
            }
        }

        let report = ReplayReport {
            sequence_id: sequence.id.clone(),
            actions_replayed: sequence.actions.len(),
            started_at,
            completed_at: now_ms().max(started_at),
        };
        tracing::info!("Replay of {} finished in {}ms", sequence.id, report.duration_ms());
        Ok(report)
    }

    async fn execute_action(&self, action: &Action) -> Result<()> {
        tracing::debug!("Replaying {}", action.kind.name());
        match &action.kind {
            ActionKind::Click { element, .. } => {
                let node = self.locate(element).await?;
                self.page.dispatch_event(&node, DomEventKind::Click).await?;
                settle(ACTION_SETTLE).await;
            }
            ActionKind::Write { text, element, .. } => {
                let node = self.locate(element).await?;
                if !self.page.describe(&node).await?.accepts_text {
                    return Err(TaskTapeError::NotAnInputElement(element.to_string()));
                }
                self.page.set_value(&node, text).await?;
                self.page.dispatch_event(&node, DomEventKind::Input).await?;
                self.page.dispatch_event(&node, DomEventKind::Change).await?;
                settle(ACTION_SETTLE).await;
            }
            ActionKind::Scroll { x, y } => {
                self.page.scroll_to(*x, *y).await?;
                settle(ACTION_SETTLE).await;
            }
            ActionKind::Wait { duration_ms } => {
                settle(Duration::from_millis(*duration_ms)).await;
            }
            ActionKind::Goto { url } => {
                self.page.navigate(url).await?;
                settle(NAVIGATION_SETTLE).await;
            }
            ActionKind::GoBack => {
                self.page.go_back().await?;
                settle(NAVIGATION_SETTLE).await;
            }
            ActionKind::Refresh => self.page.reload().await?,
        }
        Ok(())
    }

    async fn locate(&self, element: &ElementRef) -> Result<NodeHandle> {
        resolve_ref(self.page.as_ref(), element)
            .await
            .ok_or_else(|| TaskTapeError::ElementNotFound(element.to_string()))
    }
}

async fn settle(delay: Duration) {
    tokio::time::sleep(delay).await;
}
