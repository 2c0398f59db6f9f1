//! Persisted vector index over the source text.
//!
//! The index lives in `<index_dir>/index.db` (SQLite). It is built once per
//! directory and trusted as-is afterwards: changing the source text does not
//! invalidate it. Only an index whose build never finished is rebuilt.
//!
//! Fragment text sits in `chunks`; the embeddings live in a `sqlite-vec`
//! `vec0` table keyed by the same chunk index and searched with its kNN
//! `MATCH` query under the cosine metric.

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{Chunk, TextChunker};
use crate::utils::error::ApiError;
use crate::utils::similarity::{embedding_to_blob, similarity_from_distance};

use super::provider::EmbeddingProvider;

pub const INDEX_FILE: &str = "index.db";

/// Makes `vec0` and the `vec_*` functions available on every SQLite
/// connection opened afterwards in this process.
fn register_sqlite_vec() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexEntry {
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_index: usize,
    pub content: String,
    pub similarity: f32,
}

/// Build progress, shown by the page while the first index is computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    NotStarted,
    Building { embedded: usize, total: usize },
    Ready { chunks: usize },
    Failed { message: String },
}

pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl VectorIndex {
    /// Open (creating if needed) the index stored under `dir`.
    pub async fn open(dir: &Path) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            ApiError::IndexError(format!(
                "Cannot create index directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        register_sqlite_vec();

        let path = dir.join(INDEX_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        let index = Self { pool, path };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_index INTEGER PRIMARY KEY,
                content TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn meta(&self, key: &str) -> Result<Option<String>, ApiError> {
        let row = sqlx::query("SELECT value FROM index_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn is_complete(&self) -> Result<bool, ApiError> {
        Ok(self.meta("complete").await?.as_deref() == Some("true"))
    }

    pub async fn clear(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        // the next build may use a model with another dimension
        sqlx::query("DROP TABLE IF EXISTS chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_batch(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), ApiError> {
        let Some(dimension) = embeddings.first().map(Vec::len) else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;

        // vec0 needs the dimension up front, so the table follows the first batch
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vectors USING vec0(
                embedding float[{}] distance_metric=cosine
            )",
            dimension
        ))
        .execute(&mut *tx)
        .await?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            sqlx::query("INSERT OR REPLACE INTO chunks (chunk_index, content) VALUES (?1, ?2)")
                .bind(chunk.index as i64)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM chunk_vectors WHERE rowid = ?1")
                .bind(chunk.index as i64)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO chunk_vectors (rowid, embedding) VALUES (?1, ?2)")
                .bind(chunk.index as i64)
                .bind(embedding_to_blob(embedding))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_complete(
        &self,
        embedding_model: &str,
        source_path: &Path,
        chunk_count: usize,
    ) -> Result<(), ApiError> {
        let entries = [
            ("embedding_model", embedding_model.to_string()),
            ("source_path", source_path.display().to_string()),
            ("chunk_count", chunk_count.to_string()),
            ("complete", "true".to_string()),
        ];

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, ApiError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn has_vectors(&self) -> Result<bool, ApiError> {
        let row = sqlx::query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'chunk_vectors'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    #[cfg(test)]
    pub(crate) async fn entries(&self) -> Result<Vec<IndexEntry>, ApiError> {
        use crate::utils::similarity::blob_to_embedding;

        let rows = sqlx::query(
            "SELECT c.chunk_index, c.content, v.embedding
             FROM chunks c JOIN chunk_vectors v ON v.rowid = c.chunk_index
             ORDER BY c.chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexEntry {
                chunk_index: row.get::<i64, _>("chunk_index") as usize,
                content: row.get("content"),
                embedding: blob_to_embedding(&row.get::<Vec<u8>, _>("embedding")),
            })
            .collect())
    }

    /// The `limit` fragments closest to `query_embedding`, best first.
    pub async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, ApiError> {
        if limit == 0 || !self.has_vectors().await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "WITH knn AS (
                SELECT rowid, distance FROM chunk_vectors
                WHERE embedding MATCH ?1 AND k = ?2
            )
            SELECT c.chunk_index, c.content, knn.distance
            FROM knn JOIN chunks c ON c.chunk_index = knn.rowid
            ORDER BY knn.distance",
        )
        .bind(embedding_to_blob(query_embedding))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| ScoredChunk {
                chunk_index: row.get::<i64, _>("chunk_index") as usize,
                content: row.get("content"),
                similarity: similarity_from_distance(row.get::<f64, _>("distance")),
            })
            .collect();

        debug!("Retrieved {} chunks", scored.len());
        Ok(scored)
    }
}

/// Owns the process-wide index: loads or builds it on first use and shares
/// it with every later request.
pub struct IndexManager {
    source_path: PathBuf,
    index_dir: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
    cell: OnceCell<Arc<VectorIndex>>,
    status: watch::Sender<IndexStatus>,
}

impl IndexManager {
    pub fn new(rag: &RagConfig, index_dir: PathBuf) -> Self {
        let (status, _) = watch::channel(IndexStatus::NotStarted);
        Self {
            source_path: rag.source_path.clone(),
            index_dir,
            chunk_size: rag.chunk_size,
            chunk_overlap: rag.chunk_overlap,
            batch_size: rag.embedding_batch_size.max(1),
            cell: OnceCell::new(),
            status,
        }
    }

    pub fn status(&self) -> IndexStatus {
        self.status.borrow().clone()
    }

    /// Adopt a finished index left by an earlier run, without embedding
    /// anything. Returns whether one was found; an unfinished or missing
    /// index is left for `get_or_build`.
    pub async fn load_persisted(&self) -> Result<bool, ApiError> {
        if self.cell.initialized() {
            return Ok(true);
        }

        let Some(index) = self.open_complete().await? else {
            return Ok(false);
        };
        if self.cell.set(Arc::new(index)).is_err() {
            debug!("Index was initialised concurrently");
        }
        Ok(true)
    }

    /// Concurrent callers wait for the same build. A failed build leaves the
    /// manager empty so the next call tries again.
    pub async fn get_or_build(&self, embedder: &dyn EmbeddingProvider) -> Result<Arc<VectorIndex>, ApiError> {
        self.cell
            .get_or_try_init(|| async {
                match self.load_or_build(embedder).await {
                    Ok(index) => Ok(Arc::new(index)),
                    Err(e) => {
                        self.status.send_replace(IndexStatus::Failed {
                            message: e.to_string(),
                        });
                        Err(e)
                    }
                }
            })
            .await
            .map(Arc::clone)
    }

    /// The persisted index if its build finished; marks the manager ready.
    async fn open_complete(&self) -> Result<Option<VectorIndex>, ApiError> {
        if !self.index_dir.join(INDEX_FILE).exists() {
            return Ok(None);
        }

        let index = VectorIndex::open(&self.index_dir).await?;
        if !index.is_complete().await? {
            return Ok(None);
        }

        let chunks = index.count().await?;
        info!(
            "📂 Loaded persisted index {} ({} chunks)",
            index.path().display(),
            chunks
        );
        self.status.send_replace(IndexStatus::Ready { chunks });
        Ok(Some(index))
    }

    async fn load_or_build(&self, embedder: &dyn EmbeddingProvider) -> Result<VectorIndex, ApiError> {
        if let Some(index) = self.open_complete().await? {
            return Ok(index);
        }

        if self.index_dir.join(INDEX_FILE).exists() {
            let index = VectorIndex::open(&self.index_dir).await?;
            warn!(
                "Index {} was left incomplete, rebuilding",
                index.path().display()
            );
            let text = self.read_source().await?;
            index.clear().await?;
            self.build_into(&index, &text, embedder).await?;
            return Ok(index);
        }

        let text = self.read_source().await?;
        let index = VectorIndex::open(&self.index_dir).await?;
        self.build_into(&index, &text, embedder).await?;
        Ok(index)
    }

    async fn read_source(&self) -> Result<String, ApiError> {
        tokio::fs::read_to_string(&self.source_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ApiError::NotFound(format!(
                    "Source text not found: {}",
                    self.source_path.display()
                )),
                _ => ApiError::IndexError(format!(
                    "Cannot read source text {}: {}",
                    self.source_path.display(),
                    e
                )),
            })
    }

    async fn build_into(
        &self,
        index: &VectorIndex,
        text: &str,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<(), ApiError> {
        let chunks = TextChunker::new(self.chunk_size, self.chunk_overlap)
            .chunk(text)
            .map_err(|e| ApiError::IndexError(e.to_string()))?;

        let total = chunks.len();
        info!(
            "🧠 Building index from {}: {} chunks with {}",
            self.source_path.display(),
            total,
            embedder.model()
        );
        self.status
            .send_replace(IndexStatus::Building { embedded: 0, total });

        let mut embedded = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(ApiError::IndexError(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            index.insert_batch(batch, &embeddings).await?;
            embedded += batch.len();
            debug!("Embedded {}/{} chunks", embedded, total);
            self.status
                .send_replace(IndexStatus::Building { embedded, total });
        }

        index
            .mark_complete(embedder.model(), &self.source_path, total)
            .await?;
        self.status.send_replace(IndexStatus::Ready { chunks: total });
        info!("✅ Index ready ({} chunks)", total);

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const KEYWORDS: [&str; 4] = ["iago", "desdemona", "handkerchief", "venice"];

    /// Embeds text as keyword counts; counts every text it embeds.
    #[derive(Default)]
    pub(crate) struct KeywordEmbedder {
        pub embedded: AtomicUsize,
    }

    impl KeywordEmbedder {
        pub fn vector(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            let mut v: Vec<f32> = KEYWORDS
                .iter()
                .map(|k| lower.matches(k).count() as f32)
                .collect();
            v.push(0.01);
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model(&self) -> &str {
            "keyword-test"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }
    }

    pub(crate) fn write_source(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("othello.txt");
        let text = [
            "IAGO. I follow him to serve my turn upon him. Iago will be Iago. ".repeat(8),
            "DESDEMONA. My noble father, I do perceive here a divided duty. ".repeat(8),
            "OTHELLO. That handkerchief did an Egyptian to my mother give. ".repeat(8),
            "RODERIGO. Tush, never tell me; I take it much unkindly. In Venice. ".repeat(8),
        ]
        .join("\n\n");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn manager(dir: &TempDir, source: PathBuf) -> IndexManager {
        let rag = RagConfig {
            source_path: source,
            embedding_batch_size: 4,
            ..RagConfig::default()
        };
        IndexManager::new(&rag, dir.path().join("index"))
    }

    #[tokio::test]
    async fn test_build_then_reload_does_not_reembed() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir);

        let first_embedder = KeywordEmbedder::default();
        let first = manager(&dir, source.clone());
        let index = first.get_or_build(&first_embedder).await.unwrap();
        let built = index.entries().await.unwrap();
        assert!(!built.is_empty());
        assert_eq!(first_embedder.embedded.load(Ordering::SeqCst), built.len());
        assert_eq!(first.status(), IndexStatus::Ready { chunks: built.len() });
        drop(index);
        drop(first);

        let second_embedder = KeywordEmbedder::default();
        let second = manager(&dir, source);
        let reloaded = second.get_or_build(&second_embedder).await.unwrap();

        assert_eq!(second_embedder.embedded.load(Ordering::SeqCst), 0);
        assert_eq!(reloaded.entries().await.unwrap(), built);
        assert_eq!(
            reloaded.meta("embedding_model").await.unwrap().as_deref(),
            Some("keyword-test")
        );
    }

    #[tokio::test]
    async fn test_second_call_reuses_built_index() {
        let dir = TempDir::new().unwrap();
        let embedder = KeywordEmbedder::default();
        let manager = manager(&dir, write_source(&dir));

        let first = manager.get_or_build(&embedder).await.unwrap();
        let after_first = embedder.embedded.load(Ordering::SeqCst);
        let second = manager.get_or_build(&embedder).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn test_incomplete_index_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir);
        let index_dir = dir.path().join("index");

        {
            let partial = VectorIndex::open(&index_dir).await.unwrap();
            let chunk = Chunk {
                index: 0,
                content: "stale".to_string(),
            };
            partial.insert_batch(&[chunk], &[vec![1.0; 5]]).await.unwrap();
        }

        let embedder = KeywordEmbedder::default();
        let index = manager(&dir, source).get_or_build(&embedder).await.unwrap();

        assert!(index.is_complete().await.unwrap());
        assert!(embedder.embedded.load(Ordering::SeqCst) > 0);
        let entries = index.entries().await.unwrap();
        assert!(entries.iter().all(|e| e.content != "stale"));
    }

    #[tokio::test]
    async fn test_missing_source_fails_and_allows_retry() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("othello.txt");
        let manager = manager(&dir, source.clone());
        let embedder = KeywordEmbedder::default();

        let err = manager.get_or_build(&embedder).await.err().unwrap();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(matches!(manager.status(), IndexStatus::Failed { .. }));
        assert!(!dir.path().join("index").join(INDEX_FILE).exists());

        std::fs::write(&source, "IAGO. O, beware, my lord, of jealousy.").unwrap();
        assert!(manager.get_or_build(&embedder).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_persisted_adopts_finished_index_without_embedding() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir);
        let chunks = {
            let builder = manager(&dir, source.clone());
            let index = builder.get_or_build(&KeywordEmbedder::default()).await.unwrap();
            index.count().await.unwrap()
        };

        let restarted = manager(&dir, source);
        assert_eq!(restarted.status(), IndexStatus::NotStarted);
        assert!(restarted.load_persisted().await.unwrap());
        assert_eq!(restarted.status(), IndexStatus::Ready { chunks });

        let embedder = KeywordEmbedder::default();
        restarted.get_or_build(&embedder).await.unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_persisted_ignores_missing_or_unfinished_index() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, write_source(&dir));

        assert!(!manager.load_persisted().await.unwrap());
        assert!(!dir.path().join("index").join(INDEX_FILE).exists());

        VectorIndex::open(&dir.path().join("index")).await.unwrap();
        assert!(!manager.load_persisted().await.unwrap());
        assert_eq!(manager.status(), IndexStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_embeddings_are_stored_in_vec0_table() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        assert!(index.search(&[1.0, 0.0], 3).await.unwrap().is_empty());

        let chunks: Vec<Chunk> = ["north", "east", "south"]
            .iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                index,
                content: content.to_string(),
            })
            .collect();
        let embeddings = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, -1.0]];
        index.insert_batch(&chunks, &embeddings).await.unwrap();

        let row = sqlx::query("SELECT sql FROM sqlite_master WHERE name = 'chunk_vectors'")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert!(row.get::<String, _>("sql").contains("vec0"));

        let hits = index.search(&[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "east");
        assert!(hits[0].similarity > 0.9);
        assert_eq!(hits[1].content, "north");

        assert!(index.search(&[1.0, 0.0, 0.0], 2).await.is_err());
    }

    #[tokio::test]
    async fn test_search_ranks_closest_chunks_first() {
        let dir = TempDir::new().unwrap();
        let embedder = KeywordEmbedder::default();
        let index = manager(&dir, write_source(&dir))
            .get_or_build(&embedder)
            .await
            .unwrap();

        let query = KeywordEmbedder::vector("the handkerchief");
        let hits = index.search(&query, 3).await.unwrap();

        assert_eq!(hits.len(), 3);
        assert!(hits[0].content.contains("handkerchief"));
        assert!(hits[0].similarity >= hits[1].similarity);
        assert!(hits[1].similarity >= hits[2].similarity);
    }
}
