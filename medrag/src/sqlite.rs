//! SQLite-backed persistent vector store.
//!
//! Provides [`SqliteVectorStore`] which implements [`VectorStore`] using
//! [sqlx](https://docs.rs/sqlx). Entries live in a single table keyed by
//! `(document_id, chunk_index)`; vectors are little-endian `f32` blobs and
//! search is a brute-force cosine scan in insertion (`rowid`) order.
//!
//! The database runs in WAL mode, so queries keep reading a consistent
//! snapshot while an ingestion batch commits.
//!
//! # Example
//!
//! ```rust,ignore
//! use medrag::sqlite::SqliteVectorStore;
//!
//! let store = SqliteVectorStore::open("./medrag_index.db").await?;
//! store.upsert(&entries).await?;
//! let results = store.search(&query_embedding, 5).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, error};

use crate::document::{Chunk, IndexEntry, IndexManifest, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, check_dimensions, check_owner, cosine_similarity, rank};

const BACKEND: &str = "sqlite";
const MANIFEST_KEY: &str = "manifest";

/// A [`VectorStore`] persisted in a SQLite database file.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteVectorStore {
    /// Open (or create) the index at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexCorrupted`] if the file exists but is not a
    /// readable SQLite database, [`RagError::VectorStoreError`] for other
    /// failures.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(Self::write_err)?;

        let store = Self { pool, path };
        store.init_schema().await?;
        debug!(path = %store.path.display(), "opened sqlite index");
        Ok(store)
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_entries (
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                PRIMARY KEY (document_id, chunk_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Self::write_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_manifest (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Self::write_err)?;

        Ok(())
    }

    fn write_err(e: sqlx::Error) -> RagError {
        if is_corruption(&e) {
            return Self::read_err(e);
        }
        RagError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
    }

    fn read_err(e: sqlx::Error) -> RagError {
        error!(backend = BACKEND, error = %e, "index read failed");
        RagError::IndexCorrupted(e.to_string())
    }

    async fn write_entries(tx: &mut Transaction<'_, Sqlite>, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            let chunk = &entry.chunk;
            let metadata_str =
                serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());
            let blob = Self::serialize_embedding(&entry.embedding);

            sqlx::query(
                "INSERT INTO index_entries
                    (document_id, chunk_index, start_offset, end_offset, text, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset,
                    text = excluded.text,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding",
            )
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index as i64)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(&chunk.text)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(Self::write_err)?;
        }
        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(RagError::IndexCorrupted(format!(
                "embedding blob of {} bytes is not a whole number of f32 values",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry> {
        let document_id: String = row.try_get("document_id").map_err(Self::read_err)?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(Self::read_err)?;
        let start: i64 = row.try_get("start_offset").map_err(Self::read_err)?;
        let end: i64 = row.try_get("end_offset").map_err(Self::read_err)?;
        let text: String = row.try_get("text").map_err(Self::read_err)?;
        let metadata_str: String = row.try_get("metadata").map_err(Self::read_err)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(Self::read_err)?;

        let metadata: HashMap<String, String> = serde_json::from_str(&metadata_str)
            .map_err(|e| RagError::IndexCorrupted(format!("metadata of {document_id}: {e}")))?;
        let to_usize = |v: i64, what: &str| {
            usize::try_from(v).map_err(|_| {
                RagError::IndexCorrupted(format!("negative {what} ({v}) for {document_id}"))
            })
        };

        Ok(IndexEntry {
            chunk: Chunk {
                chunk_index: to_usize(chunk_index, "chunk_index")?,
                start: to_usize(start, "start_offset")?,
                end: to_usize(end, "end_offset")?,
                text,
                metadata,
                document_id: document_id.clone(),
            },
            embedding: Self::deserialize_embedding(&blob)?,
        })
    }
}

fn is_corruption(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            matches!(db.code().as_deref(), Some("11") | Some("26"))
                || message.contains("malformed")
                || message.contains("not a database")
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => true,
        _ => false,
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn manifest(&self) -> Result<Option<IndexManifest>> {
        let row = sqlx::query("SELECT value FROM index_manifest WHERE key = ?1")
            .bind(MANIFEST_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::read_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row.try_get("value").map_err(Self::read_err)?;
        let manifest = serde_json::from_str(&value)
            .map_err(|e| RagError::IndexCorrupted(format!("unreadable manifest: {e}")))?;
        Ok(Some(manifest))
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let value = serde_json::to_string(manifest).map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("cannot encode manifest: {e}"),
        })?;
        sqlx::query(
            "INSERT INTO index_manifest (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(MANIFEST_KEY)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(Self::write_err)?;
        Ok(())
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        check_dimensions(self.manifest().await?.as_ref(), entries)?;

        let mut tx = self.pool.begin().await.map_err(Self::write_err)?;
        Self::write_entries(&mut tx, entries).await?;
        tx.commit().await.map_err(Self::write_err)?;
        debug!(count = entries.len(), "upserted entries into sqlite index");
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_owner(document_id, entries)?;
        check_dimensions(self.manifest().await?.as_ref(), entries)?;
        let keep: Vec<usize> = entries.iter().map(|e| e.chunk.chunk_index).collect();
        let keep = serde_json::to_string(&keep).map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("cannot encode chunk indices: {e}"),
        })?;

        let mut tx = self.pool.begin().await.map_err(Self::write_err)?;
        Self::write_entries(&mut tx, entries).await?;
        let removed = sqlx::query(
            "DELETE FROM index_entries
             WHERE document_id = ?1
               AND chunk_index NOT IN (SELECT value FROM json_each(?2))",
        )
        .bind(document_id)
        .bind(&keep)
        .execute(&mut *tx)
        .await
        .map_err(Self::write_err)?
        .rows_affected();
        tx.commit().await.map_err(Self::write_err)?;

        debug!(document.id = %document_id, written = entries.len(), removed, "replaced document in sqlite index");
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let expected = self.manifest().await?.map(|m| m.dimensions);

        let rows = sqlx::query(
            "SELECT document_id, chunk_index, start_offset, end_offset, text, metadata, embedding
             FROM index_entries ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Self::read_err)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::row_to_entry(row)?;
            if let Some(dimensions) = expected {
                if entry.embedding.len() != dimensions {
                    return Err(RagError::IndexCorrupted(format!(
                        "entry {} holds {} dimensions, manifest says {dimensions}",
                        entry.chunk.id(),
                        entry.embedding.len()
                    )));
                }
            }
            let score = cosine_similarity(&entry.embedding, embedding);
            scored.push(SearchResult { entry, score });
        }

        Ok(rank(scored, top_k))
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM index_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::read_err)?;
        let n: i64 = row.try_get("n").map_err(Self::read_err)?;
        Ok(n.max(0) as usize)
    }

    async fn distinct_documents(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(DISTINCT document_id) AS n FROM index_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::read_err)?;
        let n: i64 = row.try_get("n").map_err(Self::read_err)?;
        Ok(n.max(0) as usize)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Self::write_err)?;
        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await
            .map_err(Self::write_err)?;
        sqlx::query("DELETE FROM index_manifest")
            .execute(&mut *tx)
            .await
            .map_err(Self::write_err)?;
        tx.commit().await.map_err(Self::write_err)?;
        debug!(path = %self.path.display(), "reset sqlite index");
        Ok(())
    }
}
