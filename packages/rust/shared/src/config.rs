//! Application configuration for Briefwise.
//!
//! User config lives at `~/.briefwise/briefwise.toml`. Every field has a
//! default, so an empty or missing file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BriefwiseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "briefwise.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".briefwise";

// ---------------------------------------------------------------------------
// Config structs (matching briefwise.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine tuning (broadcaster buffers, keepalive, start defer).
    #[serde(default)]
    pub engine: EngineConfig,

    /// LLM collaborator settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web-research collaborator settings.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Pipeline topology selection.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Job store backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tracing output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded channel capacity per progress subscriber.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Seconds of silence before a keepalive is emitted on a progress stream.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Pause after a step's start event so it reaches subscribers before
    /// the step blocks on a collaborator.
    #[serde(default = "default_start_defer_ms")]
    pub start_defer_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            keepalive_secs: default_keepalive_secs(),
            start_defer_ms: default_start_defer_ms(),
        }
    }
}

impl EngineConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn start_defer(&self) -> Duration {
        Duration::from_millis(self.start_defer_ms)
    }
}

fn default_subscriber_buffer() -> usize {
    64
}
fn default_keepalive_secs() -> u64 {
    30
}
fn default_start_defer_ms() -> u64 {
    100
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_attempts: default_llm_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_attempts() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    1000
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_research_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_research_base_url")]
    pub base_url: String,

    #[serde(default = "default_research_model")]
    pub model: String,

    #[serde(default = "default_research_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_research_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff applied after a 429.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Flat delay applied after any other failed attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_research_key_env(),
            base_url: default_research_base_url(),
            model: default_research_model(),
            timeout_secs: default_research_timeout_secs(),
            max_attempts: default_research_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_research_key_env() -> String {
    "PERPLEXITY_API_KEY".into()
}
fn default_research_base_url() -> String {
    "https://api.perplexity.ai".into()
}
fn default_research_model() -> String {
    "sonar-reasoning".into()
}
fn default_research_timeout_secs() -> u64 {
    30
}
fn default_research_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// Which briefing topology a deployment runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// parse → research → analyze, halting on the first error.
    Chain,
    /// parse → three parallel analyses → outcome assessment → action items.
    #[default]
    Tiered,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub topology: Topology,
}

/// Job store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; jobs are lost on restart.
    #[default]
    Memory,
    /// Local libSQL database file.
    Libsql,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file for the `libsql` backend. A leading `~/` is expanded.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

impl StorageConfig {
    /// The database path with `~/` expanded to the home directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| BriefwiseError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.path)),
        }
    }
}

fn default_storage_path() -> String {
    "~/.briefwise/jobs.db".into()
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject values that would only fail later, mid-job.
    pub fn validate(&self) -> Result<()> {
        check_base_url("llm.base_url", &self.llm.base_url)?;
        check_base_url("research.base_url", &self.research.base_url)?;
        if self.engine.subscriber_buffer == 0 {
            return Err(BriefwiseError::config("engine.subscriber_buffer must be at least 1"));
        }
        if self.llm.max_attempts == 0 || self.research.max_attempts == 0 {
            return Err(BriefwiseError::config("max_attempts must be at least 1"));
        }
        for (field, secs) in [
            ("engine.keepalive_secs", self.engine.keepalive_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("research.timeout_secs", self.research.timeout_secs),
        ] {
            if secs == 0 {
                return Err(BriefwiseError::config(format!("{field} must be at least 1")));
            }
        }
        Ok(())
    }
}

fn check_base_url(field: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| BriefwiseError::config(format!("{field}: invalid URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(BriefwiseError::config(format!(
            "{field}: unsupported scheme {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.briefwise/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BriefwiseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.briefwise/briefwise.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| BriefwiseError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| BriefwiseError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BriefwiseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| BriefwiseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BriefwiseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the named environment variable.
pub fn resolve_api_key(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(BriefwiseError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that both collaborator API keys are present.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(&config.llm.api_key_env)?;
    resolve_api_key(&config.research.api_key_env)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("PERPLEXITY_API_KEY"));
        assert!(toml_str.contains("topology = \"tiered\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.engine.subscriber_buffer, 64);
        assert_eq!(parsed.engine.keepalive_secs, 30);
        assert_eq!(parsed.research.model, "sonar-reasoning");
        assert_eq!(parsed.research.max_attempts, 3);
        assert_eq!(parsed.llm.max_attempts, 2);
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.research.base_url = "not a url".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("research.base_url"), "{err}");

        let mut config = AppConfig::default();
        config.llm.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.subscriber_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut config = AppConfig::default();
        config.engine.keepalive_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("engine.keepalive_secs"), "{err}");

        let mut config = AppConfig::default();
        config.llm.timeout_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("llm.timeout_secs"), "{err}");

        let mut config = AppConfig::default();
        config.research.timeout_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("research.timeout_secs"), "{err}");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(config.pipeline.topology, Topology::Tiered);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.engine.start_defer(), Duration::from_millis(100));
    }

    #[test]
    fn partial_sections_override() {
        let toml_str = r#"
[pipeline]
topology = "chain"

[storage]
backend = "libsql"
path = "/tmp/briefwise/jobs.db"

[research]
timeout_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.topology, Topology::Chain);
        assert_eq!(config.storage.backend, StorageBackend::Libsql);
        assert_eq!(
            config.storage.resolved_path().unwrap(),
            PathBuf::from("/tmp/briefwise/jobs.db")
        );
        assert_eq!(config.research.timeout_secs, 5);
        assert_eq!(config.research.max_attempts, 3);
    }

    #[test]
    fn unknown_topology_is_rejected() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[pipeline]\ntopology = \"spiral\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_config_from_reports_path() {
        let dir = std::env::temp_dir().join(format!("briefwise-cfg-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.toml");
        std::fs::write(&path, "[engine\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "BW_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
