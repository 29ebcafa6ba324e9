mod services;
mod state;

pub use services::{DefaultIngestionServices, IngestionServices};

use std::{path::Path, sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::Document, document_chunk::DocumentChunk, system_settings::SystemSettings,
        },
    },
    utils::{config::AppConfig, deadline::ensure_active, embedding::EmbeddingProvider},
};
use state_machines::core::GuardError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chunker::{ChunkSpan, Chunker};

use self::state::ready;

/// Summary of one completed ingest operation.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: Document,
    pub chunk_count: usize,
    /// True when a prior version of the document was replaced.
    pub replaced: bool,
}

pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    services: Arc<dyn IngestionServices>,
    chunk_max_chars: usize,
    chunk_overlap_chars: usize,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedding_provider: Arc<EmbeddingProvider>,
        config: &AppConfig,
    ) -> Self {
        let services = DefaultIngestionServices::new(embedding_provider, config);
        Self::with_services(db, Arc::new(services), config)
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        services: Arc<dyn IngestionServices>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            services,
            chunk_max_chars: config.chunk_max_chars,
            chunk_overlap_chars: config.chunk_overlap_chars,
        }
    }

    /// Runs the full ingest sequence for one source file: extract, chunk,
    /// embed, then persist. Persistence replaces any prior records for the
    /// same source path in a single transaction; a failure anywhere before
    /// that leaves the store untouched.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn ingest_path(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, AppError> {
        let machine = ready();
        let started = Instant::now();

        let metadata = tokio::fs::metadata(path).await.map_err(|_| {
            AppError::Validation(format!("document path {} does not exist", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(AppError::Validation(format!(
                "document path {} is not a file",
                path.display()
            )));
        }

        ensure_active(cancel, "text extraction")?;
        let extracted = self.services.extract(path).await?;
        let machine = machine
            .extract()
            .map_err(|(_, guard)| map_guard_error("extract", &guard))?;

        let text = extracted.text();
        if text.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "document {} contains no extractable text",
                path.display()
            )));
        }

        let chunker = Chunker::new(self.chunk_max_chars, self.chunk_overlap_chars)?;
        let spans: Vec<ChunkSpan> = chunker.chunks(&text).collect();
        let machine = machine
            .chunk()
            .map_err(|(_, guard)| map_guard_error("chunk", &guard))?;
        debug!(
            chunks = spans.len(),
            pages = extracted.page_count(),
            "document chunked"
        );

        let settings = SystemSettings::get_current(&self.db).await?;
        let texts: Vec<String> = spans.iter().map(|span| span.text.clone()).collect();
        let embeddings = self.services.embed_chunks(texts, cancel).await?;

        if embeddings.len() != spans.len() {
            return Err(AppError::InternalError(format!(
                "embedding count {} does not match chunk count {}",
                embeddings.len(),
                spans.len()
            )));
        }
        let expected_dimension = settings.embedding_dimensions as usize;
        for embedding in &embeddings {
            if embedding.len() != expected_dimension {
                return Err(AppError::DimensionMismatch {
                    expected: expected_dimension,
                    actual: embedding.len(),
                });
            }
        }
        let machine = machine
            .embed()
            .map_err(|(_, guard)| map_guard_error("embed", &guard))?;

        let source_path = tokio::fs::canonicalize(path)
            .await?
            .to_string_lossy()
            .into_owned();
        let existing = Document::find_by_source_path(&source_path, &self.db).await?;
        let replaced = existing.is_some();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.clone());

        let chunk_count = spans.len();
        let document = Document::new(
            existing.map(|doc| doc.id),
            file_name,
            source_path,
            metadata.len(),
            extracted.page_count(),
            to_u32(chunk_count),
        );

        let chunks: Vec<DocumentChunk> = spans
            .into_iter()
            .zip(embeddings)
            .map(|(span, embedding)| {
                DocumentChunk::new(
                    document.id.clone(),
                    to_u32(span.index),
                    to_u32(span.overlap),
                    span.text,
                    embedding,
                )
            })
            .collect();

        ensure_active(cancel, "record persistence")?;
        Document::store_with_chunks(&document, chunks, &self.db).await?;
        let _machine = machine
            .persist()
            .map_err(|(_, guard)| map_guard_error("persist", &guard))?;

        info!(
            document_id = %document.id,
            chunk_count,
            pages = document.pages,
            replaced,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "document ingested"
        );

        Ok(IngestReport {
            document,
            chunk_count,
            replaced,
        })
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
