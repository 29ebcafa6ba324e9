use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::system_settings::SystemSettings;

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    seq: u32,
    overlap: u32,
    text: String,
    embedding: Vec<f32>
});

/// Candidate breadth for the HNSW search, passed as the second operand of
/// the KNN operator.
const KNN_EF_SEARCH: usize = 40;

/// Row shape returned by the nearest-neighbor query: chunk fields plus the
/// cosine distance computed by the index.
#[derive(Debug, Deserialize)]
struct ScoredRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    updated_at: DateTime<Utc>,
    document_id: String,
    seq: u32,
    overlap: u32,
    text: String,
    embedding: Vec<f32>,
    distance: f64,
}

impl ScoredRow {
    fn into_scored_chunk(self) -> (DocumentChunk, f32) {
        #[allow(clippy::cast_possible_truncation)]
        let score = (1.0 - self.distance) as f32;
        (
            DocumentChunk {
                id: self.id,
                created_at: self.created_at,
                updated_at: self.updated_at,
                document_id: self.document_id,
                seq: self.seq,
                overlap: self.overlap,
                text: self.text,
                embedding: self.embedding,
            },
            score,
        )
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

impl DocumentChunk {
    pub fn new(
        document_id: String,
        seq: u32,
        overlap: u32,
        text: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            seq,
            overlap,
            text,
            embedding,
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE document_chunk WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn count(db: &SurrealDbClient) -> Result<u64, AppError> {
        let rows: Vec<CountRow> = db
            .client
            .query("SELECT count() FROM document_chunk GROUP ALL")
            .await?
            .take(0)?;
        Ok(rows.into_iter().next().map_or(0, |row| row.count))
    }

    /// Nearest-neighbor lookup over the chunk embeddings. Returns up to `k`
    /// chunks ordered by descending cosine similarity; ties fall back to
    /// insertion order. The query vector must match the dimension recorded
    /// in the system settings.
    pub async fn find_nearest(
        db: &SurrealDbClient,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(Self, f32)>, AppError> {
        let settings = SystemSettings::get_current(db).await?;
        let expected = settings.embedding_dimensions as usize;
        if embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM document_chunk \
             WHERE embedding <|{k},{KNN_EF_SEARCH}|> $embedding \
             ORDER BY distance ASC, created_at ASC, seq ASC"
        );
        let rows: Vec<ScoredRow> = db
            .client
            .query(query)
            .bind(("embedding", embedding.to_vec()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().map(ScoredRow::into_scored_chunk).collect())
    }
}
