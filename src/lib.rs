//! scribeq - Durable audio transcription pipeline
//!
//! A work queue plus multi-stage pipeline: audio analysis, deterministic
//! preprocessing, overlapped chunking, parallel speech-to-text, overlap-
//! aware reassembly, and optional best-effort formatting. Every state
//! change is checkpointed to SQLite, so a crash re-queues interrupted
//! tasks instead of losing them.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod stt;

// Core traits (audio → engine → document)
pub use format::Formatter;
pub use stt::{EngineOutput, SpeechEngine};

// Service facade
pub use service::TranscriptionService;

// Task model
pub use store::{
    PipelineResult, SubmitOptions, TaskSnapshot, TaskStatus, TaskStore,
};

// Error handling
pub use error::{Result, ScribeError};

// Config
pub use config::{Config, EngineKind};

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.0+abc1234"` when git hash is available, `"0.3.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
