//! Key/value persistence for recording state and completed sequences.
//! Each key is one JSON file under the storage directory.

use crate::error::Result;
use crate::recording::schema::{RecordingSequence, RecordingState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::PathBuf;

/// Storage key of the append-only list of closed sequences.
pub const SEQUENCES_KEY: &str = "recordingSequences";

/// Storage key of the single RecordingState record.
pub const STATE_KEY: &str = "recordingState";

/// Default storage directory (~/.tasktape/storage).
pub fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tasktape")
        .join("storage")
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read the value stored under `key`, `None` when nothing was written yet.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `value` under `key`, atomically replacing any previous value.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(value)?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append-only store of closed recording sequences.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    storage: Storage,
}

impl SequenceStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// All stored sequences, oldest first.
    pub async fn list(&self) -> Result<Vec<RecordingSequence>> {
        Ok(self
            .storage
            .get::<Vec<RecordingSequence>>(SEQUENCES_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn get(&self, id: &str) -> Result<Option<RecordingSequence>> {
        Ok(self.list().await?.into_iter().find(|s| s.id == id))
    }

    /// Append a closed sequence. A sequence whose id is already stored
    /// replaces that entry in place, so a repeated stop never duplicates it.
    pub async fn append(&self, sequence: RecordingSequence) -> Result<()> {
        let mut sequences = self.list().await?;
        match sequences.iter_mut().find(|s| s.id == sequence.id) {
            Some(existing) => {
                tracing::warn!("Sequence {} already stored, replacing it", sequence.id);
                *existing = sequence;
            }
            None => sequences.push(sequence),
        }
        self.storage.set(SEQUENCES_KEY, &sequences).await?;
        tracing::debug!("Sequence store now holds {} sequences", sequences.len());
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(SEQUENCES_KEY).await
    }
}

/// Persisted copy of the coordinator's RecordingState.
#[derive(Debug, Clone)]
pub struct StateStore {
    storage: Storage,
}

impl StateStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Load the last persisted state; an unreadable record falls back to idle.
    pub async fn load(&self) -> RecordingState {
        match self.storage.get::<RecordingState>(STATE_KEY).await {
            Ok(Some(state)) => state,
            Ok(None) => RecordingState::default(),
            Err(e) => {
                tracing::warn!("Failed to load recording state, starting idle: {}", e);
                RecordingState::default()
            }
        }
    }

    pub async fn save(&self, state: &RecordingState) -> Result<()> {
        self.storage.set(STATE_KEY, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::schema::{Action, ActionKind, ElementRef, Task, TaskSource};

    fn closed_sequence(description: &str) -> RecordingSequence {
        let task = Task::new(description, TaskSource::Database);
        let mut seq = RecordingSequence::open(&task, "https://example.com/login");
        seq.append(
            Action::new(
                ActionKind::Click {
                    element: ElementRef::from("#login-button"),
                    x: 4.0,
                    y: 8.0,
                },
                10,
            )
            .with_screenshot("data:image/png;base64,AAAA"),
        )
        .unwrap();
        seq.append(Action::new(
            ActionKind::Write {
                text: "alice@example.com".to_string(),
                element: ElementRef::from("#email"),
                x: 120.0,
                y: 200.0,
            },
            11,
        ))
        .unwrap();
        seq.append(Action::new(ActionKind::Wait { duration_ms: 300 }, 12))
            .unwrap();
        seq.close(true)
    }

    #[tokio::test]
    async fn test_sequence_round_trip_preserves_actions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(Storage::new(dir.path()));

        let seq = closed_sequence("Log in");
        store.append(seq.clone()).await.unwrap();

        let loaded = store.get(&seq.id).await.unwrap().unwrap();
        assert_eq!(loaded.actions, seq.actions);
        assert_eq!(
            loaded.actions[0].screenshot.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[tokio::test]
    async fn test_sequences_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(Storage::new(dir.path()));
        assert!(store.list().await.unwrap().is_empty());

        store.append(closed_sequence("first")).await.unwrap();
        store.append(closed_sequence("second")).await.unwrap();

        let all = store.list().await.unwrap();
        let names: Vec<_> = all.iter().map(|s| s.task_description.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_same_id_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(Storage::new(dir.path()));

        let first = closed_sequence("first");
        let other = closed_sequence("other");
        store.append(first.clone()).await.unwrap();
        store.append(other.clone()).await.unwrap();

        let mut again = first.clone();
        again.success = Some(false);
        store.append(again.clone()).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![again, other]);
    }

    #[tokio::test]
    async fn test_state_store_defaults_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Storage::new(dir.path()));
        assert_eq!(store.load().await, RecordingState::default());

        let task = Task::new("Search", TaskSource::Llm);
        let seq = RecordingSequence::open(&task, "https://example.com");
        let state = RecordingState::recording(task, seq);
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await, state);
    }

    #[tokio::test]
    async fn test_corrupt_state_falls_back_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("recordingState.json"), "{not json").unwrap();
        let store = StateStore::new(Storage::new(dir.path()));
        assert!(!store.load().await.is_recording);
    }
}
