use crate::config::AppConfig;
use crate::dom::Page;
use crate::recording::{Coordinator, CoordinatorHandle, SequenceStore, StateStore, Storage, ScreenshotSource};
use crate::services::{DatasetUploader, TaskCatalog, TaskGenerator};
use parking_lot::RwLock;
use std::sync::Arc;

/// Application global state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub coordinator: CoordinatorHandle,
    pub sequences: SequenceStore,
    /// Page replays run against; `None` until a browser is attached.
    page: Arc<RwLock<Option<Arc<dyn Page>>>>,
    pub task_generator: Arc<TaskGenerator>,
    pub uploader: Arc<DatasetUploader>,
    pub catalog: Arc<TaskCatalog>,
}

impl AppState {
    /// Load persisted recording state and start the coordinator.
    pub async fn new(config: AppConfig, screenshots: Option<Arc<dyn ScreenshotSource>>) -> Self {
        let storage = Storage::new(config.storage_dir.clone());
        let sequences = SequenceStore::new(storage.clone());
        let coordinator = Coordinator::load(StateStore::new(storage), sequences.clone(), screenshots)
            .await
            .spawn();

        Self {
            task_generator: Arc::new(TaskGenerator::new(&config.openrouter)),
            uploader: Arc::new(DatasetUploader::new(&config.huggingface)),
            catalog: Arc::new(TaskCatalog::default()),
            config: Arc::new(RwLock::new(config)),
            coordinator,
            sequences,
            page: Arc::new(RwLock::new(None)),
        }
    }

    pub fn attach_page(&self, page: Arc<dyn Page>) {
        *self.page.write() = Some(page);
    }

    pub fn page(&self) -> Option<Arc<dyn Page>> {
        self.page.read().clone()
    }
}
