//! Application configuration for Heritix.
//!
//! User config lives at `~/.heritix/heritix.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HeritixError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "heritix.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".heritix";

// ---------------------------------------------------------------------------
// Config structs (matching heritix.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database and audio locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload validation limits.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Text-generation and transcription service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Orchestrator tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory receiving uploaded audio files.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            audio_dir: default_audio_dir(),
        }
    }
}

fn default_database_path() -> String {
    "~/.heritix/heritix.db".into()
}
fn default_audio_dir() -> String {
    "~/.heritix/uploads".into()
}

/// `[upload]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted audio payload in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Accepted declared content types.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024
}
fn default_allowed_types() -> Vec<String> {
    [
        "audio/mpeg",
        "audio/wav",
        "audio/x-wav",
        "audio/mp4",
        "audio/webm",
        "audio/ogg",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model used by every knowledge agent.
    #[serde(default = "default_model")]
    pub model: String,

    /// Speech-to-text model.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            transcription_model: default_transcription_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_transcription_model() -> String {
    "whisper-large-v3".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Translation target; recordings already in this language skip translation.
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Log entries returned by the status view.
    #[serde(default = "default_status_log_limit")]
    pub status_log_limit: u32,

    /// Maximum records returned by search.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Pipeline runs allowed to execute at once.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            target_language: default_target_language(),
            status_log_limit: default_status_log_limit(),
            search_limit: default_search_limit(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_target_language() -> String {
    "en".into()
}
fn default_status_log_limit() -> u32 {
    20
}
fn default_search_limit() -> u32 {
    100
}
fn default_max_concurrent_runs() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Runtime views (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Retry/backoff schedule for the stage executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RetryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.pipeline.max_attempts.max(1),
            base_delay: Duration::from_millis(config.pipeline.base_delay_ms),
            max_delay: Duration::from_millis(config.pipeline.max_delay_ms),
        }
    }
}

/// Upload validation rules.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for UploadPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.upload.max_bytes,
            allowed_types: config.upload.allowed_types.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.heritix/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HeritixError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.heritix/heritix.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HeritixError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HeritixError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HeritixError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HeritixError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HeritixError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the API key env var is set and non-empty, returning its value.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(HeritixError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| HeritixError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("GROQ_API_KEY"));
        assert!(toml_str.contains("audio/mpeg"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_attempts, 3);
        assert_eq!(parsed.upload.max_bytes, 25 * 1024 * 1024);
        assert_eq!(parsed.llm.api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[pipeline]
target_language = "fr"
max_attempts = 5

[upload]
max_bytes = 1024
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.target_language, "fr");
        assert_eq!(config.pipeline.max_attempts, 5);
        assert_eq!(config.pipeline.status_log_limit, 20);
        assert_eq!(config.upload.max_bytes, 1024);
        assert_eq!(config.upload.allowed_types.len(), 6);
    }

    #[test]
    fn retry_config_backoff_doubles_and_caps() {
        let retry = RetryConfig::from(&AppConfig::default());
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff_for(1), Duration::from_secs(2));
        assert_eq!(retry.backoff_for(2), Duration::from_secs(4));
        assert_eq!(retry.backoff_for(3), Duration::from_secs(8));
        assert_eq!(retry.backoff_for(4), Duration::from_secs(10));
        assert_eq!(retry.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn upload_policy_from_app_config() {
        let policy = UploadPolicy::from(&AppConfig::default());
        assert_eq!(policy.max_bytes, 25 * 1024 * 1024);
        assert!(policy.allowed_types.iter().any(|t| t == "audio/webm"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "HERITIX_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/heritix.db").unwrap(),
            PathBuf::from("/var/lib/heritix.db")
        );
        assert!(expand_home("~/x.db").unwrap().ends_with("x.db"));
    }
}
