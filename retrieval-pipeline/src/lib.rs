#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer;

use std::time::Duration;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
    utils::{
        deadline::{ensure_active, with_timeout},
        embedding::EmbeddingProvider,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A supporting chunk plus its similarity score, as handed to the answer
/// prompt.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Embeds the question and returns the `k` most similar stored chunks in
/// descending score order. An empty store is an empty result, not an error;
/// the answer stage decides how to handle missing context.
#[instrument(skip_all, fields(k))]
pub async fn retrieve(
    db: &SurrealDbClient,
    embedding_provider: &EmbeddingProvider,
    question: &str,
    k: usize,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<RetrievedChunk>, AppError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("question must not be empty".into()));
    }

    ensure_active(cancel, "question embedding")?;
    let embedding = with_timeout(
        "question embedding",
        call_timeout,
        embedding_provider.embed(question),
    )
    .await?;

    ensure_active(cancel, "vector query")?;
    let scored = with_timeout(
        "vector query",
        call_timeout,
        DocumentChunk::find_nearest(db, &embedding, k),
    )
    .await?;

    let preview: String = question.chars().take(120).collect();
    info!(
        question_preview = %preview.replace('\n', " "),
        results = scored.len(),
        "retrieval finished"
    );

    Ok(scored
        .into_iter()
        .map(|(chunk, score)| RetrievedChunk { chunk, score })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{storage::types::system_settings::SystemSettings, utils::config::AppConfig};
    use uuid::Uuid;

    const DIMENSION: usize = 24;

    async fn setup() -> (SurrealDbClient, EmbeddingProvider) {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        SystemSettings::sync(&db, "hashed", DIMENSION as u32, "test-model")
            .await
            .expect("Failed to seed settings");
        db.build_indexes(DIMENSION, false)
            .await
            .expect("Failed to build indexes");

        (db, EmbeddingProvider::new_hashed(DIMENSION))
    }

    async fn store_chunk(db: &SurrealDbClient, provider: &EmbeddingProvider, seq: u32, text: &str) {
        let embedding = provider.embed(text).await.expect("embed failed");
        let chunk =
            DocumentChunk::new("doc_1".into(), seq, 0, text.to_owned(), embedding);
        db.store_item(chunk).await.expect("Failed to store chunk");
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(AppConfig::default().request_timeout_secs)
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() {
        let (db, provider) = setup().await;
        store_chunk(
            &db,
            &provider,
            0,
            "Tokio worker threads execute asynchronous tasks cooperatively.",
        )
        .await;
        store_chunk(
            &db,
            &provider,
            1,
            "Sourdough bread needs a mature starter and patience.",
        )
        .await;

        let cancel = CancellationToken::new();
        let results = retrieve(
            &db,
            &provider,
            "how do tokio worker threads execute tasks?",
            2,
            default_timeout(),
            &cancel,
        )
        .await
        .expect("retrieval failed");

        assert_eq!(results.len(), 2);
        assert!(
            results
                .first()
                .map(|r| r.chunk.text.contains("Tokio"))
                .unwrap_or(false),
            "expected the Tokio chunk first, got {:?}",
            results.first().map(|r| r.chunk.text.clone())
        );
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_retrieve_never_exceeds_k() {
        let (db, provider) = setup().await;
        for seq in 0..6 {
            store_chunk(&db, &provider, seq, "repeated filler about vector stores").await;
        }

        let cancel = CancellationToken::new();
        let results = retrieve(
            &db,
            &provider,
            "vector stores",
            3,
            default_timeout(),
            &cancel,
        )
        .await
        .expect("retrieval failed");
        assert!(results.len() <= 3);
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_sequence() {
        let (db, provider) = setup().await;
        let cancel = CancellationToken::new();
        let results = retrieve(
            &db,
            &provider,
            "anything at all",
            5,
            default_timeout(),
            &cancel,
        )
        .await
        .expect("retrieval failed");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected_before_embedding() {
        let (db, provider) = setup().await;
        let cancel = CancellationToken::new();
        let err = retrieve(&db, &provider, "   ", 5, default_timeout(), &cancel).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cancelled_retrieval_issues_no_calls() {
        let (db, provider) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = retrieve(&db, &provider, "question", 5, default_timeout(), &cancel).await;
        assert!(matches!(err, Err(AppError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_provider_dimension_is_store_error() {
        let (db, _provider) = setup().await;
        let wrong = EmbeddingProvider::new_hashed(DIMENSION / 2);
        let cancel = CancellationToken::new();
        let err = retrieve(&db, &wrong, "question", 5, default_timeout(), &cancel).await;
        assert!(matches!(err, Err(AppError::DimensionMismatch { .. })));
    }
}
