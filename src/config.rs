//! Configuration parsing and validation.
//!
//! The config file is TOML. Every section except `[db]` has defaults, so a
//! minimal file only names the database path:
//!
//! ```toml
//! [db]
//! path = "./data/rqa.sqlite"
//!
//! [repository]
//! url = "https://github.com/acme/widget"
//! ```
//!
//! Secrets never live in the file: providers read API keys from the
//! environment variable named by `api_key_env`, after `.env` has been
//! loaded by the binary.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Deadline for a whole query workflow run. Unbounded when unset.
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            query_timeout_secs: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Dimensionality in effect, falling back to the provider's default.
    pub fn resolved_dims(&self) -> usize {
        match (self.dims, self.provider.as_str()) {
            (Some(d), _) => d,
            (None, "openai") => 1536,
            (None, _) => 384,
        }
    }

    pub fn resolved_model(&self) -> String {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.clone(),
            (None, "openai") => "text-embedding-3-small".to_string(),
            (None, _) => "feature-hash".to_string(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "stub".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// The repository whose contents are indexed and asked about.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Git URL, or a local directory path.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Display name. Derived from `url` when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// One-line description used to decide what counts as in scope.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_shallow")]
    pub shallow: bool,
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            branch: default_branch(),
            name: None,
            description: None,
            cache_dir: default_cache_dir(),
            shallow: default_shallow(),
            include_extensions: default_include_extensions(),
            exclude_dirs: default_exclude_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl RepositoryConfig {
    /// `(owner, name)` parsed from the URL's last two path segments.
    pub fn owner_and_name(&self) -> (Option<String>, Option<String>) {
        let Some(url) = &self.url else {
            return (None, None);
        };
        let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
        let mut parts = trimmed.rsplit(['/', ':']);
        let name = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let owner = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        (owner, name)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.owner_and_name().1)
            .unwrap_or_else(|| "the repository".to_string())
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/repo")
}
fn default_shallow() -> bool {
    true
}
fn default_include_extensions() -> Vec<String> {
    [
        "rs", "py", "md", "txt", "toml", "yaml", "yml", "json", "js", "ts", "html", "css",
        "ipynb",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        ".github",
        "target",
        "venv",
        "__pycache__",
        "node_modules",
        "dist",
        "build",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_bytes() -> u64 {
    1_000_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.query_timeout_secs == Some(0) {
        bail!("retrieval.query_timeout_secs must be > 0 when set");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }
    if config.embedding.resolved_dims() == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "stub" | "openai" => {}
        other => bail!("Unknown llm provider: '{}'. Must be stub or openai.", other),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.resolved_dims(), 384);
        assert_eq!(config.llm.provider, "stub");
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert!(config.repository.exclude_dirs.contains(&".git".to_string()));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[llm]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn openai_embedding_defaults() {
        let config = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap();
        assert_eq!(config.embedding.resolved_dims(), 1536);
        assert_eq!(config.embedding.resolved_model(), "text-embedding-3-small");
    }

    #[test]
    fn repository_name_from_url() {
        let repo = RepositoryConfig {
            url: Some("https://github.com/acme/widget.git".into()),
            ..RepositoryConfig::default()
        };
        assert_eq!(
            repo.owner_and_name(),
            (Some("acme".to_string()), Some("widget".to_string()))
        );
        assert_eq!(repo.display_name(), "widget");
        assert_eq!(RepositoryConfig::default().display_name(), "the repository");
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/rqa.example.toml")).unwrap();
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.repository.display_name(), "widget");
        assert!(!config.logging.json);
    }
}
