use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        deadline::{ensure_active, with_timeout},
        embedding::EmbeddingProvider,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::extract::{self, ExtractedDocument};

/// External collaborators of the ingestion pipeline, behind a trait so tests
/// can substitute fakes.
#[async_trait]
pub trait IngestionServices: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, AppError>;

    /// Embeds chunk texts in order. Implementations own batching, per-call
    /// timeouts, and cancellation checks between calls.
    async fn embed_chunks(
        &self,
        texts: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct DefaultIngestionServices {
    embedding_provider: Arc<EmbeddingProvider>,
    batch_size: usize,
    call_timeout: Duration,
}

impl DefaultIngestionServices {
    pub fn new(embedding_provider: Arc<EmbeddingProvider>, config: &AppConfig) -> Self {
        Self {
            embedding_provider,
            batch_size: config.embedding_batch_size.max(1),
            call_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

#[async_trait]
impl IngestionServices for DefaultIngestionServices {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, AppError> {
        extract::extract_document(path).await
    }

    async fn embed_chunks(
        &self,
        texts: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            ensure_active(cancel, "chunk embedding")?;
            let batch_embeddings = with_timeout(
                "chunk embedding",
                self.call_timeout,
                self.embedding_provider.embed_batch(batch.to_vec()),
            )
            .await?;
            debug!(batch = batch.len(), "embedded chunk batch");
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }
}
