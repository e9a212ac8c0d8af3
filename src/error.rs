use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskTapeError {
    #[error("No recording in progress")]
    NotRecording,

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element is not a text input: {0}")]
    NotAnInputElement(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Screenshot capture declined: {0}")]
    CaptureDeclined(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Coordinator is not running")]
    CoordinatorUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, TaskTapeError>;
