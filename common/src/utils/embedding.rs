use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

/// Upper bound on a single embedding input. Inputs beyond this are rejected
/// before any network call.
pub const EMBEDDING_INPUT_CHAR_LIMIT: usize = 12_000;

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
        retry_attempts: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                let client = client.ok_or_else(|| {
                    AppError::InternalError(
                        "embedding backend 'openai' requires an API client".into(),
                    )
                })?;
                Ok(Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                    config.embedding_retry_attempts,
                ))
            }
            EmbeddingBackend::Hashed => Ok(Self::new_hashed(config.embedding_dimensions as usize)),
        }
    }

    pub fn new_openai(
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
        retry_attempts: usize,
    ) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                retry_attempts,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        validate_input(text)?;

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                retry_attempts,
            } => {
                let embeddings = openai_embed_batch(
                    client,
                    model,
                    *dimensions,
                    *retry_attempts,
                    vec![text.to_owned()],
                )
                .await?;
                embeddings.into_iter().next().ok_or(AppError::LLMParsing(
                    "No embedding data received from API".into(),
                ))
            }
        }
    }

    /// Embeds a batch of inputs, preserving input order.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        for text in &texts {
            validate_input(text)?;
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
                retry_attempts,
            } => openai_embed_batch(client, model, *dimensions, *retry_attempts, texts).await,
        }
    }
}

fn validate_input(text: &str) -> Result<(), AppError> {
    if text.is_empty() {
        return Err(AppError::Validation(
            "embedding input must not be empty".into(),
        ));
    }
    if text.chars().count() > EMBEDDING_INPUT_CHAR_LIMIT {
        return Err(AppError::Validation(format!(
            "embedding input exceeds the {EMBEDDING_INPUT_CHAR_LIMIT} character limit"
        )));
    }
    Ok(())
}

/// Issues the embedding request, retrying transient provider failures with
/// jittered exponential backoff. Retry policy lives here in the adapter;
/// callers never retry.
async fn openai_embed_batch(
    client: &Client<OpenAIConfig>,
    model: &str,
    dimensions: u32,
    retry_attempts: usize,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, AppError> {
    let expected = texts.len();
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .map(jitter)
        .take(retry_attempts);

    let response = Retry::spawn(retry_strategy, || async {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(texts.clone())
            .dimensions(dimensions)
            .build()
            .map_err(AppError::Embedding)?;

        client
            .embeddings()
            .create(request)
            .await
            .map_err(AppError::Embedding)
    })
    .await?;

    let embeddings: Vec<Vec<f32>> = response
        .data
        .into_iter()
        .map(|item| item.embedding)
        .collect();

    if embeddings.len() != expected {
        return Err(AppError::LLMParsing(format!(
            "embedding provider returned {} vectors for {expected} inputs",
            embeddings.len()
        )));
    }

    debug!(
        batch = expected,
        dimensions, "Embedding batch completed"
    );

    Ok(embeddings)
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        if let Some(value) = vector.get_mut(idx) {
            *value += 1.0;
        }
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
