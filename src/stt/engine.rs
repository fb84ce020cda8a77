//! The `SpeechEngine` trait and a scriptable mock implementation.
//!
//! The pipeline is engine-agnostic: anything that turns a canonical
//! sample buffer into text plugs in here. Engines signal retryable
//! trouble with [`ScribeError::TransientEngine`]; every other error is
//! treated as permanent for the chunk that hit it.

use crate::error::{Result, ScribeError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transcription output for a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    /// Engine-reported confidence in 0.0..=1.0, when available.
    pub confidence: Option<f32>,
}

impl EngineOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A speech-to-text backend.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one chunk of canonical 16 kHz mono samples.
    ///
    /// `language` is an ISO code hint, or `None` for auto-detection.
    async fn transcribe(&self, samples: &[i16], language: Option<&str>) -> Result<EngineOutput>;

    /// Human-readable engine name for logs.
    fn name(&self) -> &str;

    /// Whether the engine is ready to accept work (model loaded,
    /// service reachable). Purely informational; the pipeline still
    /// dispatches and relies on error classification.
    fn is_ready(&self) -> bool {
        true
    }
}

/// What one mock invocation should do.
#[derive(Debug, Clone)]
enum MockStep {
    Respond(EngineOutput),
    Transient(String),
    Fatal(String),
}

/// Call metadata recorded by [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub sample_len: usize,
    pub language: Option<String>,
}

/// Scriptable engine for tests.
///
/// Responses are consumed in call order; once the script runs out the
/// fallback response repeats. Transient failures injected with
/// [`MockEngine::with_transient_failures`] precede the script.
pub struct MockEngine {
    script: Mutex<Vec<MockStep>>,
    fallback: EngineOutput,
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            fallback: EngineOutput::new("mock transcript"),
            transient_failures: AtomicUsize::new(0),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the fallback response used when the script is exhausted.
    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.fallback = EngineOutput::new(text);
        self
    }

    /// Appends a successful scripted response.
    pub fn then_respond(self, output: EngineOutput) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockStep::Respond(output));
        self
    }

    /// Appends a scripted transient failure.
    pub fn then_fail_transient(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockStep::Transient(message.into()));
        self
    }

    /// Appends a scripted permanent failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockStep::Fatal(message.into()));
        self
    }

    /// Fails the first `count` calls with a transient error.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Adds an artificial per-call delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SpeechEngine for MockEngine {
    async fn transcribe(&self, samples: &[i16], language: Option<&str>) -> Result<EngineOutput> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(MockCall {
            sample_len: samples.len(),
            language: language.map(str::to_string),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ScribeError::TransientEngine {
                message: "injected transient failure".to_string(),
            });
        }

        let step = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };

        match step {
            Some(MockStep::Respond(output)) => Ok(output),
            Some(MockStep::Transient(message)) => Err(ScribeError::TransientEngine { message }),
            Some(MockStep::Fatal(message)) => Err(ScribeError::EngineFatal { message }),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_response() {
        let engine = MockEngine::new().with_response("hello");
        let out = engine.transcribe(&[0; 16], Some("en")).await.unwrap();
        assert_eq!(out.text, "hello");
    }

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let engine = MockEngine::new()
            .then_respond(EngineOutput::new("first"))
            .then_respond(EngineOutput::new("second").with_confidence(0.8));

        assert_eq!(engine.transcribe(&[], None).await.unwrap().text, "first");
        let second = engine.transcribe(&[], None).await.unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(second.confidence, Some(0.8));
        // Script exhausted: fallback repeats
        assert_eq!(
            engine.transcribe(&[], None).await.unwrap().text,
            "mock transcript"
        );
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let engine = MockEngine::new()
            .with_response("recovered")
            .with_transient_failures(2);

        for _ in 0..2 {
            let err = engine.transcribe(&[], None).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(engine.transcribe(&[], None).await.unwrap().text, "recovered");
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_transient() {
        let engine = MockEngine::new().then_fail("model exploded");
        let err = engine.transcribe(&[], None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let engine = MockEngine::new();
        engine.transcribe(&[0; 100], Some("ru")).await.unwrap();
        engine.transcribe(&[0; 50], None).await.unwrap();

        let calls = engine.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].sample_len, 100);
        assert_eq!(calls[0].language.as_deref(), Some("ru"));
        assert_eq!(calls[1].language, None);
    }
}
