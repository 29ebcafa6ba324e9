use crate::storage::types::document::deserialize_flexible_id;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::document_chunk::DocumentChunk;

/// Store-wide settings, kept as a single `system_settings:current` record.
/// The embedding dimension recorded here is the store's declared dimension:
/// every persisted chunk and every query vector must match it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemSettings {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
    pub query_model: String,
}

impl SystemSettings {
    /// Reconciles the stored settings with the configured embedding setup.
    /// Returns the effective settings and whether the embedding dimension
    /// changed. Switching dimensions while chunks are stored is refused, as
    /// the existing vectors would no longer be comparable.
    pub async fn sync(
        db: &SurrealDbClient,
        embedding_model: &str,
        embedding_dimensions: u32,
        query_model: &str,
    ) -> Result<(Self, bool), AppError> {
        let existing: Option<Self> = db.select(("system_settings", "current")).await?;

        let Some(current) = existing else {
            let created: Option<Self> = db
                .create(("system_settings", "current"))
                .content(Self {
                    id: "current".to_string(),
                    embedding_model: embedding_model.to_string(),
                    embedding_dimensions,
                    query_model: query_model.to_string(),
                })
                .await?;

            let created =
                created.ok_or(AppError::Validation("Failed to initialize settings".into()))?;
            return Ok((created, false));
        };

        let dimensions_changed = current.embedding_dimensions != embedding_dimensions;
        if dimensions_changed {
            let chunk_count = DocumentChunk::count(db).await?;
            if chunk_count > 0 {
                return Err(AppError::Validation(format!(
                    "embedding dimensions changed from {} to {} but the store holds {} chunks; run `ragctl clear --force` before switching embedding models",
                    current.embedding_dimensions, embedding_dimensions, chunk_count
                )));
            }
        }

        if dimensions_changed
            || current.embedding_model != embedding_model
            || current.query_model != query_model
        {
            let updated = Self::update(
                db,
                Self {
                    id: "current".to_string(),
                    embedding_model: embedding_model.to_string(),
                    embedding_dimensions,
                    query_model: query_model.to_string(),
                },
            )
            .await?;
            return Ok((updated, dimensions_changed));
        }

        Ok((current, false))
    }

    pub async fn get_current(db: &SurrealDbClient) -> Result<Self, AppError> {
        let settings: Option<Self> = db
            .client
            .query("SELECT * FROM type::thing('system_settings', 'current')")
            .await?
            .take(0)?;

        settings.ok_or(AppError::NotFound("System settings not found".into()))
    }

    pub async fn update(db: &SurrealDbClient, changes: Self) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('system_settings', 'current') MERGE $changes RETURN AFTER")
            .bind(("changes", changes))
            .await?
            .take(0)?;

        updated.ok_or(AppError::Validation(
            "Something went wrong updating the settings".into(),
        ))
    }
}
