//! Runtime configuration.
//!
//! Backend endpoints and pipeline defaults are loaded from a TOML file and
//! validated once at startup. Workspace-level settings (engine, model,
//! chunking) live on the [`Workspace`](crate::models::Workspace) record, not
//! here.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub relational: RelationalConfig,
    #[serde(default)]
    pub search_cluster: ClusterConfig,
    #[serde(default)]
    pub retrieval_service: ClusterConfig,
    #[serde(default)]
    pub knowledge_base: ClusterConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    pub blob: BlobConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationalConfig {
    /// Postgres connection string.
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Endpoint settings shared by the three managed HTTP backends.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClusterConfig {
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token, if the backend needs one.
    pub api_key_env: Option<String>,
    /// Managed-retrieval / knowledge-base: backend index or store identifier.
    pub index: Option<String>,
}

impl ClusterConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Result<&str> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| Error::config("backend endpoint not configured"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Bedrock-style managed LLM API endpoint.
    #[serde(default = "default_bedrock_endpoint")]
    pub bedrock_endpoint: String,
    /// Sagemaker-style custom inference endpoint base.
    #[serde(default = "default_sagemaker_endpoint")]
    pub sagemaker_endpoint: String,
    /// OpenAI-style API base URL.
    #[serde(default = "default_openai_base")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            bedrock_endpoint: default_bedrock_endpoint(),
            sagemaker_endpoint: default_sagemaker_endpoint(),
            openai_base_url: default_openai_base(),
            openai_api_key_env: default_openai_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_bedrock_endpoint() -> String {
    "http://localhost:8091".to_string()
}
fn default_sagemaker_endpoint() -> String {
    "http://localhost:8092".to_string()
}
fn default_openai_base() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// Root directory for raw chunk text blobs.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_crawl_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub default_page_limit: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_crawl_timeout_secs(),
            default_page_limit: default_page_limit(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ragmesh/{}", env!("CARGO_PKG_VERSION"))
}
fn default_crawl_timeout_secs() -> u64 {
    20
}
fn default_page_limit() -> u64 {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::config(format!("failed to parse config file: {e}")))?;

    if config.relational.database_url.is_empty() {
        return Err(Error::config("relational.database_url must not be empty"));
    }
    if config.relational.max_connections == 0 {
        return Err(Error::config("relational.max_connections must be > 0"));
    }
    if config.retrieval.default_limit == 0 {
        return Err(Error::config("retrieval.default_limit must be >= 1"));
    }
    if config.crawler.default_page_limit == 0 {
        return Err(Error::config("crawler.default_page_limit must be >= 1"));
    }

    Ok(config)
}
