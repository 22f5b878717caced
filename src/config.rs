use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub chat: ChatConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    pub folder: PathBuf,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_overlap_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_collection() -> String {
    "passages".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub summary_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_tokens_summary_model")]
    pub max_tokens_summary_model: usize,
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    pub system_prompt: String,
    #[serde(default = "default_summarization_prompt")]
    pub summarization_prompt: String,
}

fn default_max_tokens() -> usize {
    10_000
}
fn default_max_tokens_summary_model() -> usize {
    100_000
}
fn default_buffer() -> usize {
    3_000
}
fn default_summarization_prompt() -> String {
    "Summarize the following conversation between a user and an AI assistant. \
     Focus on key points, decisions, and action items. Be concise but \
     comprehensive. Avoid including trivial details. Do NOT respond to the \
     conversation directly; provide only the summary."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_allow")]
    pub allow: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: default_tool_allow(),
        }
    }
}

fn default_tool_allow() -> Vec<String> {
    vec![
        "search_documents".to_string(),
        "sql_query".to_string(),
        "run_script".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingestion.max_chunk_size == 0 {
        anyhow::bail!("ingestion.max_chunk_size must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [0.0, 1.0]");
    }

    if config.chat.buffer >= config.chat.max_tokens {
        anyhow::bail!("chat.buffer must be smaller than chat.max_tokens");
    }
    if config.chat.max_tokens_summary_model <= config.chat.max_tokens {
        anyhow::bail!("chat.max_tokens_summary_model must exceed chat.max_tokens");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("parley.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    const MINIMAL: &str = r#"
[db]
path = "data/parley.sqlite"

[ingestion]
folder = "docs"

[chat]
model = "gpt-4.1"
summary_model = "gpt-4.1-nano"
system_prompt = "You are a helpful assistant."
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let (_dir, path) = write_config(MINIMAL);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.ingestion.max_chunk_size, 1000);
        assert_eq!(cfg.ingestion.overlap_size, 200);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.chat.buffer, 3000);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.tools.allow.len(), 3);
    }

    #[test]
    fn rejects_buffer_at_or_above_max_tokens() {
        let content = MINIMAL.replace(
            "system_prompt = \"You are a helpful assistant.\"",
            "system_prompt = \"x\"\nmax_tokens = 100\nbuffer = 100",
        );
        let (_dir, path) = write_config(&content);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_without_dims() {
        let content = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n");
        let (_dir, path) = write_config(&content);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let content = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"acme\"\nmodel = \"m\"\ndims = 8\n"
        );
        let (_dir, path) = write_config(&content);
        assert!(load_config(&path).is_err());
    }
}
