//! SQLite-backed [`VectorStore`].
//!
//! Chunks, their metadata and their embeddings live in one `chunks` row
//! each; the autoincrement `seq` column records insertion order. Search
//! decodes every matching vector and ranks in process, the same brute-force
//! strategy as the in-memory store, so both backends order ties the same way.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use repo_qa_core::embedding::{blob_to_vec, vec_to_blob};
use repo_qa_core::models::{file_type_for, Chunk, ChunkMetadata, MetadataFilter, ScoredChunk};
use repo_qa_core::store::{rank, IndexedChunk, StoreCounts, VectorStore};

use crate::{db, migrate};

const LAST_INDEXED_KEY: &str = "last_indexed";

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to prepare corpus schema")?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, sqlx::Error> {
    let source: String = row.try_get("source")?;
    let locator: String = row.try_get("locator")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata = serde_json::from_str::<ChunkMetadata>(&metadata_json).unwrap_or_else(|_| {
        ChunkMetadata {
            file_type: file_type_for(&source),
            source: source.clone(),
            locator: locator.clone(),
            ..ChunkMetadata::default()
        }
    });
    let index: i64 = row.try_get("chunk_index")?;
    let start: i64 = row.try_get("start_char")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        index: index.max(0) as usize,
        start: start.max(0) as usize,
        hash: row.try_get("hash")?,
        metadata,
    })
}

/// Decode one search candidate. Undecodable rows are logged and skipped.
fn row_to_candidate(row: &sqlx::sqlite::SqliteRow) -> Option<(Chunk, Vec<f32>)> {
    let decoded = row_to_chunk(row).and_then(|chunk| {
        let blob: Vec<u8> = row.try_get("embedding")?;
        Ok((chunk, blob_to_vec(&blob)))
    });
    match decoded {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            let seq: Option<i64> = row.try_get("seq").ok();
            warn!(seq, error = %e, "skipping undecodable chunk row");
            None
        }
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn location(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }

    async fn insert(&self, entries: &[IndexedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let chunk = &entry.chunk;
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, locator, chunk_index, start_char, text,
                                    hash, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.source)
            .bind(&chunk.metadata.locator)
            .bind(chunk.index as i64)
            .bind(chunk.start as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&metadata_json)
            .bind(vec_to_blob(&entry.vector))
            .bind(entry.vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, source, locator, chunk_index, start_char, text, hash,
                   metadata_json, embedding
            FROM chunks
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .filter_map(row_to_candidate)
            .filter(|(chunk, _)| filter.matches(&chunk.metadata));
        Ok(rank(query, candidates, k))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS chunks, COUNT(DISTINCT source) AS documents FROM chunks",
        )
        .fetch_one(&self.pool)
        .await?;
        let chunks: i64 = row.get("chunks");
        let documents: i64 = row.get("documents");

        let last: Option<String> =
            sqlx::query_scalar("SELECT value FROM corpus_meta WHERE key = ?")
                .bind(LAST_INDEXED_KEY)
                .fetch_optional(&self.pool)
                .await?;
        let last_indexed = last
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM chunks ORDER BY seq ASC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(StoreCounts {
            document_count: documents as usize,
            chunk_count: chunks as usize,
            last_indexed,
            vector_dims: dims.map(|d| d.max(0) as usize),
        })
    }

    async fn purge(&self, source: Option<&str>) -> Result<u64> {
        let result = match source {
            Some(path) => {
                sqlx::query("DELETE FROM chunks WHERE source = ?")
                    .bind(path)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM chunks").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn set_last_indexed(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO corpus_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_INDEXED_KEY)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(source: &str, text: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.into(),
                index: 0,
                start: 0,
                hash: "h".into(),
                metadata: ChunkMetadata {
                    source: source.into(),
                    locator: format!("https://example.com/{source}"),
                    file_type: "md".into(),
                    ..ChunkMetadata::default()
                },
            },
            vector,
        }
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("corpus.sqlite");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .insert(&[entry("a.md", "alpha", vec![1.0, 0.0]), entry("b.md", "beta", vec![0.0, 1.0])])
                .await
                .unwrap();
            store.set_last_indexed(Utc::now()).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.chunk_count, 2);
        assert_eq!(counts.document_count, 2);
        assert!(counts.last_indexed.is_some());
        assert_eq!(counts.vector_dims, Some(2));

        let hits = store.nearest(&[1.0, 0.0], 1, &MetadataFilter::new()).await.unwrap();
        assert_eq!(hits[0].chunk.text, "alpha");
        assert_eq!(hits[0].chunk.metadata.locator, "https://example.com/a.md");
    }

    #[tokio::test]
    async fn ties_keep_insertion_order_and_filter_applies() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("c.sqlite")).await.unwrap();
        store
            .insert(&[
                entry("a.md", "first", vec![1.0, 0.0]),
                entry("b.md", "second", vec![1.0, 0.0]),
                entry("a.md", "third", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.nearest(&[1.0, 0.0], 5, &MetadataFilter::new()).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        let only_a = MetadataFilter::new().eq("source", "a.md");
        let hits = store.nearest(&[1.0, 0.0], 5, &only_a).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn nearest_skips_bad_rows() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("b.sqlite")).await.unwrap();
        store
            .insert(&[
                entry("a.md", "good", vec![1.0, 0.0]),
                entry("b.md", "wide", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO chunks (id, source, locator, chunk_index, start_char, text,
                                hash, metadata_json, embedding, dims)
            VALUES ('bad', 'c.md', 'x', 'not a number', 0, 'bad', 'h', '{}', X'0000803F', 1)
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let hits = store.nearest(&[1.0, 0.0], 5, &MetadataFilter::new()).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.text != "wide"));
        assert_eq!(hits[0].chunk.text, "good");
    }

    #[tokio::test]
    async fn purge_by_source_and_all() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("p.sqlite")).await.unwrap();
        let batch = [entry("a.md", "x", vec![1.0]), entry("b.md", "y", vec![1.0])];
        store.insert(&batch).await.unwrap();
        store.insert(&batch).await.unwrap();
        assert_eq!(store.counts().await.unwrap().chunk_count, 4);
        assert_eq!(store.purge(Some("a.md")).await.unwrap(), 2);
        assert_eq!(store.purge(None).await.unwrap(), 2);
        assert_eq!(store.counts().await.unwrap().document_count, 0);
    }
}
