//! Recording: action model, persistence, the coordinator actor and per-page recorders.

pub mod coordinator;
pub mod protocol;
pub mod recorder;
pub mod schema;
pub mod store;

pub use coordinator::{Coordinator, CoordinatorHandle, RecorderSignal, ScreenshotSource};
pub use protocol::{Message, MessageResponse};
pub use recorder::{Recorder, RecorderMode};
pub use schema::{Action, ActionKind, ElementRef, RecordingSequence, RecordingState, Task, TaskSource};
pub use store::{SequenceStore, StateStore, Storage};
