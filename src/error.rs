//! Error types for scribeq.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Input errors: bad or corrupt audio. Fatal for the task, never retried.
    #[error("Unreadable audio input: {message}")]
    Input { message: String },

    // Configuration errors: caught at submission or construction time.
    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Deterministic preprocessing/chunking failure. Fatal per task.
    #[error("Audio processing failed: {message}")]
    Processing { message: String },

    // Transient engine or formatting-service failure. Retried with backoff.
    #[error("Transient engine error: {message}")]
    TransientEngine { message: String },

    // Non-transient engine failure (malformed segment, model error).
    #[error("Engine error: {message}")]
    EngineFatal { message: String },

    // Durable store unavailable or rejected an operation.
    #[error("Task store error: {message}")]
    Store { message: String },

    #[error("Task not found: {task_id}")]
    NotFound { task_id: String },

    #[error("Task result not ready: {task_id}")]
    NotReady { task_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Returns true for errors worth retrying with backoff.
    ///
    /// Only transient engine/service errors qualify; everything else is
    /// either fatal for the task or handled by the dispatcher's store
    /// reconnect loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScribeError::TransientEngine { .. })
    }

    /// Returns true for store-level failures.
    ///
    /// The dispatcher halts claiming on these and retries the store
    /// connection instead of failing tasks.
    pub fn is_store(&self) -> bool {
        matches!(self, ScribeError::Store { .. })
    }
}

impl From<rusqlite::Error> for ScribeError {
    fn from(e: rusqlite::Error) -> Self {
        ScribeError::Store {
            message: e.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribeError>;
