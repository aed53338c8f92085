//! Configuration management for graphsec.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `graphsec.toml` file
//! 3. User config `~/.config/graphsec/config.toml`
//! 4. Built-in defaults (lowest priority)
//!
//! The sources-and-sinks confidence threshold and conflict policy have no
//! built-in value; they must be set before an investigation can run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    Missing(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration.
    pub llm: LLMConfig,

    /// Graph backend configuration.
    pub graph: GraphConfig,

    /// Repository walk and parse configuration.
    pub ingestion: IngestionConfig,

    /// Parser-specific configuration.
    pub parser: ParserConfig,

    /// Summarizer worker pool configuration.
    pub summarizer: SummarizerConfig,

    /// Documentation processor configuration.
    pub docs: DocsConfig,

    /// Sources-and-sinks workflow configuration.
    pub sources_sinks: SourcesSinksConfig,

    /// Status tracking configuration.
    pub status: StatusConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./graphsec.toml` (project local)
    /// 2. `~/.config/graphsec/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("graphsec.toml").exists() {
            return Self::from_file("graphsec.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("graphsec").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // LLM overrides
        if let Ok(provider) = std::env::var("GRAPHSEC_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("GRAPHSEC_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Ok(url) = std::env::var("GRAPHSEC_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("GRAPHSEC_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }

        // Summarizer overrides
        if let Ok(n) = std::env::var("GRAPHSEC_MAX_PARALLEL") {
            if let Ok(n) = n.parse() {
                self.summarizer.max_parallel = n;
            }
        }
        if let Ok(n) = std::env::var("GRAPHSEC_CONTEXT_TOKENS") {
            if let Ok(n) = n.parse() {
                self.summarizer.context_token_limit = n;
            }
        }

        // Graph overrides
        if let Ok(path) = std::env::var("GRAPHSEC_GRAPH_PATH") {
            self.graph.path = path;
        }
    }

    /// Reject settings no pipeline could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.summarizer.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "summarizer.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.summarizer.context_token_limit == 0 {
            return Err(ConfigError::Invalid(
                "summarizer.context_token_limit must be positive".to_string(),
            ));
        }
        if self.sources_sinks.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "sources_sinks.max_parallel must be at least 1".to_string(),
            ));
        }
        if let Some(t) = self.sources_sinks.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::Invalid(format!(
                    "sources_sinks.confidence_threshold {} is outside [0, 1]",
                    t
                )));
            }
        }
        match self.graph.backend.as_str() {
            "surreal" | "memory" => Ok(()),
            other => Err(ConfigError::Invalid(format!("unknown graph backend '{}'", other))),
        }
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    /// Provider name: "openai", "anthropic", "ollama", "openrouter" or "openai-compatible".
    pub provider: String,

    /// Model name (provider-specific).
    pub model: Option<String>,

    /// Base URL for API (for openai-compatible providers).
    pub base_url: Option<String>,

    /// API key (can also be set via environment variable).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Maximum tokens for response.
    pub max_tokens: u32,

    /// API version (for Anthropic).
    pub api_version: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_LLM_PROVIDER.to_string(),
            model: None,
            base_url: None,
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_version: Some(DEFAULT_ANTHROPIC_API_VERSION.to_string()),
        }
    }
}

impl LLMConfig {
    /// Get the model name, falling back to provider defaults.
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "anthropic" | "claude" => DEFAULT_ANTHROPIC_MODEL.to_string(),
            "ollama" => DEFAULT_OLLAMA_MODEL.to_string(),
            _ => DEFAULT_OPENAI_MODEL.to_string(),
        })
    }

    /// Get the base URL, falling back to provider defaults.
    pub fn base_url_or_default(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.provider.as_str() {
            "anthropic" | "claude" => DEFAULT_ANTHROPIC_URL.to_string(),
            "ollama" => DEFAULT_OLLAMA_URL.to_string(),
            "openrouter" => DEFAULT_OPENROUTER_URL.to_string(),
            _ => DEFAULT_OPENAI_URL.to_string(),
        })
    }

    /// Get API key from config or environment.
    pub fn api_key_or_env(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GRAPHSEC_LLM_API_KEY").ok())
            .or_else(|| match self.provider.as_str() {
                "anthropic" | "claude" => std::env::var("ANTHROPIC_API_KEY").ok(),
                "openrouter" => std::env::var("OPENROUTER_API_KEY").ok(),
                _ => std::env::var("OPENAI_API_KEY").ok(),
            })
    }
}

/// Graph backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// `surreal` (embedded RocksDB) or `memory`.
    pub backend: String,

    /// Database directory for the `surreal` backend.
    pub path: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_GRAPH_BACKEND.to_string(),
            path: DEFAULT_GRAPH_PATH.to_string(),
        }
    }
}

/// Repository walk and parse configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Glob patterns a file must match (empty means all files).
    pub include_globs: Vec<String>,

    /// Glob patterns that exclude a file.
    pub exclude_globs: Vec<String>,

    /// Directory names skipped entirely.
    pub exclude_dirs: Vec<String>,

    /// Honour `.gitignore` files during the walk.
    pub respect_gitignore: bool,

    /// Files above this size are flagged `oversized`.
    pub max_file_size: u64,

    /// Registry name of the parser to run.
    pub parser: String,

    /// Compare paths case-sensitively when mapping.
    pub case_sensitive_paths: bool,

    /// Parent directory for temporary clones (system temp dir when unset).
    pub clone_dir: Option<PathBuf>,

    /// Seconds allowed for a clone.
    pub clone_timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            include_globs: DEFAULT_INCLUDE_GLOBS.iter().map(|s| s.to_string()).collect(),
            exclude_globs: DEFAULT_EXCLUDE_GLOBS.iter().map(|s| s.to_string()).collect(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            respect_gitignore: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            parser: DEFAULT_PARSER.to_string(),
            case_sensitive_paths: true,
            clone_dir: None,
            clone_timeout_secs: DEFAULT_CLONE_TIMEOUT_SECS,
        }
    }
}

/// Parser-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// External tool settings.
    pub external: ExternalParserConfig,
}

/// External parser tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalParserConfig {
    /// Tool binary name or path. The parser is unavailable when unset.
    pub command: Option<String>,

    /// Arguments; `{root}` is replaced with the repository root as seen by the tool.
    pub args: Vec<String>,

    /// Container image used when the tool cannot run natively.
    pub image: Option<String>,

    /// Container runtime binary.
    pub container_runtime: String,

    /// Mount point of the repository inside the container.
    pub mount_point: String,

    /// Platforms (`std::env::consts::OS` values) where the tool runs natively.
    pub native_platforms: Vec<String>,

    /// Always run in the container.
    pub force_container: bool,

    /// Wall-clock limit for one tool run.
    pub timeout_secs: u64,
}

impl Default for ExternalParserConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec!["{root}".to_string()],
            image: None,
            container_runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
            native_platforms: DEFAULT_NATIVE_PLATFORMS.iter().map(|s| s.to_string()).collect(),
            force_container: false,
            timeout_secs: DEFAULT_PARSER_TIMEOUT_SECS,
        }
    }
}

/// Summarizer worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub max_parallel: usize,
    pub context_token_limit: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_secs: u64,
    pub max_summary_tokens: u32,
    pub max_content_chars: usize,

    /// Summarize File nodes.
    pub summarize_files: bool,

    /// Summarize mapped Function/Class/Method nodes.
    pub summarize_ast: bool,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            context_token_limit: DEFAULT_CONTEXT_TOKEN_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            summarize_files: false,
            summarize_ast: true,
        }
    }
}

/// Documentation processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    pub extensions: Vec<String>,
    pub fetch_timeout_secs: u64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_DOC_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

/// How disagreeing analyzer verdicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// One confident confirmation suffices.
    Any,
    /// More than half of the analyzers must confirm.
    Majority,
    /// Every analyzer must confirm.
    Unanimous,
}

/// Sources-and-sinks workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSinksConfig {
    /// Minimum analyzer confidence for a confirmation. Required.
    pub confidence_threshold: Option<f64>,

    /// Verdict combination rule. Required.
    pub conflict_policy: Option<ConflictPolicy>,

    pub max_parallel: usize,
    pub reports_dir: PathBuf,
    pub max_call_depth: usize,
    pub analyzer_timeout_secs: u64,

    /// Funnel names to run, in order.
    pub funnels: Vec<String>,

    /// Analyzer names to run.
    pub analyzers: Vec<String>,
}

impl Default for SourcesSinksConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: None,
            conflict_policy: None,
            max_parallel: DEFAULT_ANALYZE_PARALLEL,
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            analyzer_timeout_secs: DEFAULT_ANALYZER_TIMEOUT_SECS,
            funnels: DEFAULT_FUNNELS.iter().map(|s| s.to_string()).collect(),
            analyzers: DEFAULT_ANALYZERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Status tracking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Directory receiving JSON snapshots of terminal statuses.
    pub persist_dir: Option<PathBuf>,
}
