use crate::defaults;
use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
    pub formatting: FormattingConfig,
}

/// Task store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database. `:memory:` keeps the store in-process
    /// (useful for tests; crash recovery then has nothing to recover).
    pub path: PathBuf,
}

/// Dispatcher / worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of pipeline workers (one active task per worker).
    pub workers: usize,
    /// Idle-worker polling interval in milliseconds.
    pub claim_poll_ms: u64,
    /// Delay before retrying the store after a store-level failure, in milliseconds.
    pub store_retry_ms: u64,
}

/// Pipeline stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum chunk duration in seconds.
    pub chunk_duration_secs: u64,
    /// Overlap between consecutive chunks in seconds.
    pub overlap_secs: u64,
    /// Concurrency ceiling for chunk transcription within one task.
    pub chunk_concurrency: usize,
    /// Maximum transcription attempts per chunk.
    pub max_chunk_attempts: u32,
    /// Base retry backoff delay in milliseconds.
    pub retry_base_ms: u64,
}

/// Speech engine selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Which engine implementation to use.
    pub kind: EngineKind,
    /// Language hint ("auto" for detection).
    pub language: String,
}

/// Engine implementation enumeration.
///
/// The crate itself only defines the [`SpeechEngine`](crate::SpeechEngine)
/// seam; embedders map the configured kind to a concrete engine when
/// composing the service:
///
/// ```text
/// let engine: Arc<dyn SpeechEngine> = match config.engine.kind {
///     EngineKind::Standard => Arc::new(StandardEngine::load(...)?),
///     EngineKind::Accelerated => Arc::new(AcceleratedEngine::load(...)?),
/// };
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Reference engine, maximum compatibility.
    #[default]
    Standard,
    /// Throughput-optimized engine variant.
    Accelerated,
}

impl EngineKind {
    /// Stable name, matching the config-file and env-override spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Standard => "standard",
            EngineKind::Accelerated => "accelerated",
        }
    }
}

/// Formatting service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FormattingConfig {
    /// Whether assembled documents are sent to the formatting service.
    pub enabled: bool,
    /// Formatting window size in characters.
    pub window_chars: usize,
    /// Overlap between formatting windows in characters.
    pub window_overlap_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scribeq.db"),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            claim_poll_ms: defaults::CLAIM_POLL_INTERVAL.as_millis() as u64,
            store_retry_ms: defaults::STORE_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
            overlap_secs: defaults::OVERLAP_SECS,
            chunk_concurrency: defaults::CHUNK_CONCURRENCY,
            max_chunk_attempts: defaults::MAX_CHUNK_ATTEMPTS,
            retry_base_ms: defaults::RETRY_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Standard,
            language: defaults::AUTO_LANGUAGE.to_string(),
        }
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_chars: defaults::FORMAT_WINDOW_CHARS,
            window_overlap_chars: defaults::FORMAT_WINDOW_OVERLAP_CHARS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ScribeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCRIBEQ_DB → store.path
    /// - SCRIBEQ_WORKERS → dispatch.workers
    /// - SCRIBEQ_LANGUAGE → engine.language
    /// - SCRIBEQ_ENGINE → engine.kind ("standard" | "accelerated")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("SCRIBEQ_DB")
            && !path.is_empty()
        {
            self.store.path = PathBuf::from(path);
        }

        if let Ok(workers) = std::env::var("SCRIBEQ_WORKERS")
            && let Ok(n) = workers.parse::<usize>()
            && n > 0
        {
            self.dispatch.workers = n;
        }

        if let Ok(language) = std::env::var("SCRIBEQ_LANGUAGE")
            && !language.is_empty()
        {
            self.engine.language = language;
        }

        if let Ok(kind) = std::env::var("SCRIBEQ_ENGINE") {
            match kind.as_str() {
                "standard" => self.engine.kind = EngineKind::Standard,
                "accelerated" => self.engine.kind = EngineKind::Accelerated,
                _ => {}
            }
        }

        self
    }

    /// Validate cross-field constraints.
    ///
    /// Invalid pipeline parameters are a `Config` error caught here, at
    /// construction time, never per-task.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_duration_secs == 0 {
            return Err(ScribeError::Config {
                key: "pipeline.chunk_duration_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.pipeline.overlap_secs >= self.pipeline.chunk_duration_secs {
            return Err(ScribeError::Config {
                key: "pipeline.overlap_secs".to_string(),
                message: format!(
                    "overlap ({}s) must be shorter than chunk duration ({}s)",
                    self.pipeline.overlap_secs, self.pipeline.chunk_duration_secs
                ),
            });
        }
        if self.dispatch.workers == 0 {
            return Err(ScribeError::Config {
                key: "dispatch.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.chunk_concurrency == 0 {
            return Err(ScribeError::Config {
                key: "pipeline.chunk_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.formatting.window_overlap_chars >= self.formatting.window_chars {
            return Err(ScribeError::Config {
                key: "formatting.window_overlap_chars".to_string(),
                message: "must be smaller than window_chars".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/scribeq/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scribeq")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.store.path, PathBuf::from("scribeq.db"));
        assert_eq!(config.dispatch.workers, defaults::WORKERS);
        assert_eq!(config.pipeline.chunk_duration_secs, 300);
        assert_eq!(config.pipeline.overlap_secs, 10);
        assert_eq!(config.pipeline.chunk_concurrency, 4);
        assert_eq!(config.pipeline.max_chunk_attempts, 3);
        assert_eq!(config.engine.kind, EngineKind::Standard);
        assert_eq!(config.engine.language, "auto");
        assert!(config.formatting.enabled);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [store]
            path = "/var/lib/scribeq/tasks.db"

            [dispatch]
            workers = 4

            [pipeline]
            chunk_duration_secs = 120
            overlap_secs = 5
            chunk_concurrency = 8

            [engine]
            kind = "accelerated"
            language = "ru"

            [formatting]
            enabled = false
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.store.path, PathBuf::from("/var/lib/scribeq/tasks.db"));
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.pipeline.chunk_duration_secs, 120);
        assert_eq!(config.pipeline.overlap_secs, 5);
        assert_eq!(config.pipeline.chunk_concurrency, 8);
        assert_eq!(config.engine.kind, EngineKind::Accelerated);
        assert_eq!(config.engine.language, "ru");
        assert!(!config.formatting.enabled);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [dispatch]
            workers = 8
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.dispatch.workers, 8);

        // Everything else should be defaults
        assert_eq!(config.pipeline.chunk_duration_secs, 300);
        assert_eq!(config.engine.kind, EngineKind::Standard);
        assert!(config.formatting.enabled);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [pipeline
            chunk_duration_secs = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_scribeq_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let invalid_toml = r#"
            [store
            path = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_not_shorter_than_chunk() {
        let mut config = Config::default();
        config.pipeline.chunk_duration_secs = 10;
        config.pipeline.overlap_secs = 10;

        let result = config.validate();
        assert!(result.is_err());
        match result {
            Err(ScribeError::Config { key, .. }) => {
                assert_eq!(key, "pipeline.overlap_secs");
            }
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.dispatch.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_concurrency() {
        let mut config = Config::default();
        config.pipeline.chunk_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_duration() {
        let mut config = Config::default();
        config.pipeline.chunk_duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_kind_serde_round_trip() {
        let toml_str = toml::to_string(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.kind, EngineKind::Standard);
    }

    #[test]
    fn test_engine_kind_as_str_matches_config_spelling() {
        assert_eq!(EngineKind::Standard.as_str(), "standard");
        assert_eq!(EngineKind::Accelerated.as_str(), "accelerated");
        // Same spelling the TOML layer uses
        let mut config = Config::default();
        config.engine.kind = EngineKind::Accelerated;
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("kind = \"accelerated\""));
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("scribeq"));
        assert!(path_str.ends_with("config.toml"));
    }
}
