//! Error type shared by the player, backends, and config loading.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoopError>;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("no output device")]
    NoOutputDevice,

    #[error("output error: {0}")]
    Output(String),

    /// The player was closed; its handles are gone.
    #[error("loop player is closed")]
    Closed,

    /// Priming a successor failed inside the advance worker.
    #[error("loop player faulted: {0}")]
    Faulted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
