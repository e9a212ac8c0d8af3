//! External collaborators: task generation, dataset upload, and the built-in task catalog.

pub mod catalog;
pub mod huggingface;
pub mod openrouter;

pub use catalog::TaskCatalog;
pub use huggingface::{DatasetUploader, UploadResult};
pub use openrouter::TaskGenerator;
