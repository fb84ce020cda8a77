//! Audio loading, analysis, and preprocessing.
//!
//! Everything downstream of [`wav::load`] works on the canonical stream:
//! 16-bit PCM, 16kHz, mono.

pub mod analyzer;
pub mod preprocessor;
pub mod wav;

pub use analyzer::{AnalysisParams, AudioAnalyzer};
pub use preprocessor::Preprocessor;
