use crate::{error::AppError, utils::config::AppConfig};

use super::types::{system_settings::SystemSettings, StoredObject};
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

/// Embedded engines carry no authentication layer; signin only applies to
/// remote endpoints.
fn is_embedded_engine(address: &str) -> bool {
    address.starts_with("mem:")
        || address.starts_with("rocksdb:")
        || address.starts_with("surrealkv:")
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !is_embedded_engine(address) {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Reconciles the settings record with the configuration and (re)builds
    /// the indexes the pipeline relies on. Must run before any ingest or
    /// query operation.
    pub async fn ensure_initialized(&self, config: &AppConfig) -> Result<SystemSettings, AppError> {
        let (settings, dimensions_changed) = SystemSettings::sync(
            self,
            &config.embedding_model,
            config.embedding_dimensions,
            &config.query_model,
        )
        .await?;

        self.build_indexes(settings.embedding_dimensions as usize, dimensions_changed)
            .await?;

        Ok(settings)
    }

    pub async fn build_indexes(
        &self,
        dimension: usize,
        rebuild_vector_index: bool,
    ) -> Result<(), Error> {
        if rebuild_vector_index {
            self.client
                .query(format!(
                    "REMOVE INDEX IF EXISTS idx_chunk_embedding ON TABLE document_chunk;
                     DEFINE INDEX idx_chunk_embedding ON TABLE document_chunk FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE;"
                ))
                .await?
                .check()?;
        } else {
            self.client
                .query(format!(
                    "DEFINE INDEX IF NOT EXISTS idx_chunk_embedding ON TABLE document_chunk FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE;"
                ))
                .await?
                .check()?;
        }

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE document_chunk FIELDS document_id")
            .await?
            .check()?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_source_path ON TABLE document FIELDS source_path UNIQUE")
            .await?
            .check()?;

        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to delete
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
