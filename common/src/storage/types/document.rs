use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::document_chunk::DocumentChunk;

stored_object!(Document, "document", {
    file_name: String,
    source_path: String,
    bytes: u64,
    pages: u32,
    chunk_count: u32
});

/// Replaces a document and its chunks in one transaction so concurrent
/// readers observe either the previous or the new version, never a mix.
const REPLACE_DOCUMENT_RECORDS: &str = r"
    BEGIN TRANSACTION;
    LET $doc = $document;

    DELETE document_chunk WHERE document_id = $doc.id;

    FOR $chunk IN $chunks {
        CREATE type::thing('document_chunk', $chunk.id) CONTENT {
            id: type::thing('document_chunk', $chunk.id),
            document_id: $chunk.document_id,
            seq: $chunk.seq,
            overlap: $chunk.overlap,
            text: $chunk.text,
            embedding: $chunk.embedding,
            created_at: $chunk.created_at,
            updated_at: $chunk.updated_at
        };
    };

    UPSERT type::thing('document', $doc.id) CONTENT {
        id: type::thing('document', $doc.id),
        file_name: $doc.file_name,
        source_path: $doc.source_path,
        bytes: $doc.bytes,
        pages: $doc.pages,
        chunk_count: $doc.chunk_count,
        created_at: $doc.created_at,
        updated_at: $doc.updated_at
    };

    COMMIT TRANSACTION;
";

const DELETE_DOCUMENT_RECORDS: &str = r"
    BEGIN TRANSACTION;
    DELETE document_chunk WHERE document_id = $document_id;
    DELETE type::thing('document', $document_id);
    COMMIT TRANSACTION;
";

const CLEAR_ALL_RECORDS: &str = r"
    BEGIN TRANSACTION;
    DELETE document_chunk;
    DELETE document;
    COMMIT TRANSACTION;
";

impl Document {
    pub fn new(
        id: Option<String>,
        file_name: String,
        source_path: String,
        bytes: u64,
        pages: u32,
        chunk_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: now,
            updated_at: now,
            file_name,
            source_path,
            bytes,
            pages,
            chunk_count,
        }
    }

    /// Human-readable size for the `list` output.
    pub fn human_size(&self) -> String {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * 1024;
        if self.bytes < KIB {
            format!("{} bytes", self.bytes)
        } else if self.bytes < MIB {
            #[allow(clippy::cast_precision_loss)]
            let kib = self.bytes as f64 / KIB as f64;
            format!("{kib:.2} KB")
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mib = self.bytes as f64 / MIB as f64;
            format!("{mib:.2} MB")
        }
    }

    pub async fn find_by_source_path(
        source_path: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM document WHERE source_path = $source_path")
            .bind(("source_path", source_path.to_owned()))
            .await?;
        let documents: Vec<Self> = response.take(0)?;
        Ok(documents.into_iter().next())
    }

    pub async fn list(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let documents: Vec<Self> = db
            .client
            .query("SELECT * FROM document ORDER BY created_at ASC")
            .await?
            .take(0)?;
        Ok(documents)
    }

    /// Atomically replaces the stored records for this document. Prior chunks
    /// keyed by the same document id are removed in the same transaction the
    /// new chunks and the registry row are written in.
    pub async fn store_with_chunks(
        document: &Self,
        chunks: Vec<DocumentChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(REPLACE_DOCUMENT_RECORDS)
            .bind(("document", document.clone()))
            .bind(("chunks", chunks))
            .await?
            .check()?;
        Ok(())
    }

    /// Removes one document and every chunk that belongs to it.
    pub async fn delete_with_chunks(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let document = db
            .get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;

        db.client
            .query(DELETE_DOCUMENT_RECORDS)
            .bind(("document_id", id.to_owned()))
            .await?
            .check()?;

        Ok(document)
    }

    /// Removes every document and chunk from the store.
    pub async fn clear_all(db: &SurrealDbClient) -> Result<(), AppError> {
        db.client.query(CLEAR_ALL_RECORDS).await?.check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn sample_chunks(document_id: &str, texts: &[&str]) -> Vec<DocumentChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(seq, text)| {
                DocumentChunk::new(
                    document_id.to_owned(),
                    u32::try_from(seq).unwrap_or(u32::MAX),
                    0,
                    (*text).to_owned(),
                    vec![0.1, 0.2, 0.3],
                )
            })
            .collect()
    }

    async fn chunk_rows_for(document_id: &str, db: &SurrealDbClient) -> Vec<DocumentChunk> {
        db.client
            .query("SELECT * FROM document_chunk WHERE document_id = $document_id ORDER BY seq ASC")
            .bind(("document_id", document_id.to_owned()))
            .await
            .expect("query failed")
            .take(0)
            .expect("failed to read chunk rows")
    }

    #[test]
    fn test_human_size_formatting() {
        let doc = |bytes| Document::new(None, "a.pdf".into(), "/tmp/a.pdf".into(), bytes, 1, 1);
        assert_eq!(doc(512).human_size(), "512 bytes");
        assert_eq!(doc(2048).human_size(), "2.00 KB");
        assert_eq!(doc(3 * 1024 * 1024).human_size(), "3.00 MB");
    }

    #[tokio::test]
    async fn test_store_with_chunks_roundtrip() {
        let db = memory_db().await;
        let document = Document::new(
            None,
            "report.pdf".into(),
            "/tmp/report.pdf".into(),
            4096,
            3,
            2,
        );
        let chunks = sample_chunks(&document.id, &["first chunk", "second chunk"]);

        Document::store_with_chunks(&document, chunks, &db)
            .await
            .expect("Failed to store document with chunks");

        let stored: Option<Document> = db.get_item(&document.id).await.expect("Failed to fetch");
        let stored = stored.expect("Document should be stored");
        assert_eq!(stored.file_name, "report.pdf");
        assert_eq!(stored.chunk_count, 2);

        let rows = chunk_rows_for(&document.id, &db).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.first().map(|c| c.text.as_str()), Some("first chunk"));
    }

    #[tokio::test]
    async fn test_store_with_chunks_replaces_prior_records() {
        let db = memory_db().await;
        let document = Document::new(None, "notes.txt".into(), "/tmp/notes.txt".into(), 128, 1, 3);
        let first = sample_chunks(&document.id, &["a", "b", "c"]);
        Document::store_with_chunks(&document, first, &db)
            .await
            .expect("first store failed");

        let mut updated = document.clone();
        updated.chunk_count = 2;
        let second = sample_chunks(&document.id, &["x", "y"]);
        Document::store_with_chunks(&updated, second, &db)
            .await
            .expect("second store failed");

        let rows = chunk_rows_for(&document.id, &db).await;
        assert_eq!(rows.len(), 2, "re-ingest must not leave duplicate chunks");
        assert_eq!(rows.first().map(|c| c.text.as_str()), Some("x"));

        let documents = Document::list(&db).await.expect("list failed");
        assert_eq!(documents.len(), 1, "registry must hold one row per source");
        assert_eq!(documents.first().map(|d| d.chunk_count), Some(2));
    }

    #[tokio::test]
    async fn test_find_by_source_path() {
        let db = memory_db().await;
        let document = Document::new(None, "a.pdf".into(), "/docs/a.pdf".into(), 64, 1, 1);
        Document::store_with_chunks(&document, sample_chunks(&document.id, &["only"]), &db)
            .await
            .expect("store failed");

        let found = Document::find_by_source_path("/docs/a.pdf", &db)
            .await
            .expect("lookup failed");
        assert_eq!(found.map(|d| d.id), Some(document.id));

        let missing = Document::find_by_source_path("/docs/other.pdf", &db)
            .await
            .expect("lookup failed");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_with_chunks() {
        let db = memory_db().await;
        let keep = Document::new(None, "keep.pdf".into(), "/docs/keep.pdf".into(), 64, 1, 1);
        let drop = Document::new(None, "drop.pdf".into(), "/docs/drop.pdf".into(), 64, 1, 2);
        Document::store_with_chunks(&keep, sample_chunks(&keep.id, &["kept"]), &db)
            .await
            .expect("store failed");
        Document::store_with_chunks(&drop, sample_chunks(&drop.id, &["one", "two"]), &db)
            .await
            .expect("store failed");

        let removed = Document::delete_with_chunks(&drop.id, &db)
            .await
            .expect("delete failed");
        assert_eq!(removed.file_name, "drop.pdf");

        assert!(chunk_rows_for(&drop.id, &db).await.is_empty());
        assert_eq!(chunk_rows_for(&keep.id, &db).await.len(), 1);

        let err = Document::delete_with_chunks(&drop.id, &db).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let db = memory_db().await;
        let a = Document::new(None, "a.pdf".into(), "/docs/a.pdf".into(), 64, 1, 1);
        let b = Document::new(None, "b.pdf".into(), "/docs/b.pdf".into(), 64, 1, 1);
        Document::store_with_chunks(&a, sample_chunks(&a.id, &["a"]), &db)
            .await
            .expect("store failed");
        Document::store_with_chunks(&b, sample_chunks(&b.id, &["b"]), &db)
            .await
            .expect("store failed");

        Document::clear_all(&db).await.expect("clear failed");

        assert!(Document::list(&db).await.expect("list failed").is_empty());
        assert_eq!(DocumentChunk::count(&db).await.expect("count failed"), 0);
    }
}
