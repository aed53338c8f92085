//! Default values for graphsec configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Graph Defaults
// ============================================================================

/// Default graph backend.
pub const DEFAULT_GRAPH_BACKEND: &str = "surreal";

/// Default on-disk location of the embedded graph database.
pub const DEFAULT_GRAPH_PATH: &str = ".graphsec/graph.db";

// ============================================================================
// Ingestion Defaults
// ============================================================================

/// Files larger than this are recorded but not summarized (512 KB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024;

/// Default parser registry name.
pub const DEFAULT_PARSER: &str = "tree-sitter";

/// Seconds allowed for a shallow clone.
pub const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 300;

/// Default include globs. Empty means everything.
pub const DEFAULT_INCLUDE_GLOBS: &[&str] = &[];

/// Default directories to exclude from the filesystem walk.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Dependencies
    "node_modules",
    "vendor",
    "venv",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    // Build outputs
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    // IDE/Editor
    ".idea",
    ".vscode",
    ".vs",
    // graphsec's own data
    ".graphsec",
];

/// Default file patterns to exclude.
pub const DEFAULT_EXCLUDE_GLOBS: &[&str] = &[
    "**/*.lock",
    "**/*.log",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.map",
    "**/*.pyc",
    "**/*.class",
    "**/*.o",
    "**/*.so",
    "**/*.dll",
    "**/*.exe",
    "**/*.png",
    "**/*.jpg",
    "**/*.jpeg",
    "**/*.gif",
    "**/*.ico",
    "**/*.woff",
    "**/*.woff2",
    "**/*.pdf",
    "**/*.zip",
    "**/*.tar",
    "**/*.gz",
];

// ============================================================================
// External Parser Defaults
// ============================================================================

/// Default container runtime binary.
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// Where the repository is mounted inside the container.
pub const DEFAULT_MOUNT_POINT: &str = "/workspace";

/// Platforms on which the external tool is run natively.
pub const DEFAULT_NATIVE_PLATFORMS: &[&str] = &["linux", "macos"];

/// Wall-clock limit for one external parser run.
pub const DEFAULT_PARSER_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// Summarizer Defaults
// ============================================================================

/// Concurrent summarizer workers.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Rolling context budget in tokens.
pub const DEFAULT_CONTEXT_TOKEN_LIMIT: usize = 20_000;

/// Retries per item after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Backoff ceiling.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Timeout applied to every LLM request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Maximum tokens requested for one summary.
pub const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 512;

/// File content beyond this many characters is truncated in prompts.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 24_000;

/// Characters per token used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

// ============================================================================
// Documentation Defaults
// ============================================================================

/// Documentation file extensions.
pub const DEFAULT_DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc"];

/// Seconds allowed to fetch a documentation URI.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Identifiers shorter than this are not linked from documentation.
pub const MIN_DOC_IDENTIFIER_LEN: usize = 4;

// ============================================================================
// Sources-and-Sinks Defaults
// ============================================================================

/// Concurrent analyzer calls.
pub const DEFAULT_ANALYZE_PARALLEL: usize = 4;

/// Default directory for investigation reports.
pub const DEFAULT_REPORTS_DIR: &str = ".graphsec/reports";

/// Maximum CALLS hops considered when inferring data flow.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 3;

/// Timeout applied to each analyzer call.
pub const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 120;

/// Funnels enabled when none are configured.
pub const DEFAULT_FUNNELS: &[&str] = &["summary-keywords"];

/// Analyzers enabled when none are configured.
pub const DEFAULT_ANALYZERS: &[&str] = &["llm", "documentation"];

/// Keywords suggesting a summary describes a source of untrusted data.
pub const SOURCE_KEYWORDS: &[&str] = &[
    "user input",
    "request",
    "query parameter",
    "http",
    "form",
    "cookie",
    "header",
    "environment variable",
    "command line",
    "argv",
    "stdin",
    "socket",
    "upload",
    "deserializ",
    "reads file",
];

/// Keywords suggesting a summary describes a sensitive sink.
pub const SINK_KEYWORDS: &[&str] = &[
    "sql",
    "database",
    "execute",
    "exec",
    "shell",
    "subprocess",
    "command",
    "eval",
    "writes file",
    "file system",
    "render",
    "template",
    "redirect",
    "log",
    "response",
];

/// Symbol names suggesting a source or sink, matched case-insensitively.
pub const SECURITY_SYMBOLS: &[&str] = &[
    "input", "request", "read", "recv", "getenv", "argv", "param", "query", "execute",
    "exec", "system", "popen", "eval", "write", "render", "send", "redirect", "open",
];

// ============================================================================
// LLM Defaults
// ============================================================================

/// Default LLM provider.
pub const DEFAULT_LLM_PROVIDER: &str = "openai";

/// Default max tokens for LLM responses.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// OpenAI defaults
/// Default OpenAI API URL.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
/// Default OpenAI model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

// Anthropic defaults
/// Default Anthropic API URL.
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
/// Default Anthropic model.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
/// Default Anthropic API version.
pub const DEFAULT_ANTHROPIC_API_VERSION: &str = "2023-06-01";

// Ollama defaults
/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/v1";
/// Default Ollama model.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

// OpenRouter defaults
/// Default OpenRouter API URL.
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
