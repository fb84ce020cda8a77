//! Speech-to-text engine abstraction.

pub mod engine;

pub use engine::{EngineOutput, MockEngine, SpeechEngine};
