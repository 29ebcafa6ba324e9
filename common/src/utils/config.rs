use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Which embedding backend the pipeline talks to. `openai` covers any
/// OpenAI-compatible embedding endpoint; `hashed` is a deterministic local
/// bag-of-words backend used for tests and offline smoke runs.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAI
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_embedding_retry_attempts")]
    pub embedding_retry_attempts: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_api_key")]
    pub llm_api_key: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_surrealdb_address() -> String {
    "surrealkv://./data/ragctl.db".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "ragctl".to_string()
}

fn default_surrealdb_database() -> String {
    "documents".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_embedding_retry_attempts() -> usize {
    2
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_api_key() -> String {
    "ollama".to_string()
}

fn default_query_model() -> String {
    "llama3.1".to_string()
}

fn default_chunk_max_chars() -> usize {
    1500
}

fn default_chunk_overlap_chars() -> usize {
    200
}

fn default_retrieval_top_k() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: default_surrealdb_credential(),
            surrealdb_password: default_surrealdb_credential(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            embedding_backend: default_embedding_backend(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_retry_attempts: default_embedding_retry_attempts(),
            embedding_batch_size: default_embedding_batch_size(),
            llm_base_url: default_llm_base_url(),
            llm_api_key: default_llm_api_key(),
            query_model: default_query_model(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap_chars: default_chunk_overlap_chars(),
            retrieval_top_k: default_retrieval_top_k(),
            request_timeout_secs: default_request_timeout_secs(),
            data_dir: default_data_dir(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("ragctl").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
