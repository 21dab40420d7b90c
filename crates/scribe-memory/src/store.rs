use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::SimilaritySearch;
use scribe_core::types::Document;

use crate::chunk::chunk_text;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);";

fn db_err(e: impl std::fmt::Display) -> ScribeError {
    ScribeError::Database(e.to_string())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// SQLite-backed document store ranked by embedding cosine similarity.
///
/// Documents live in named collections (`research`, `style`, `seo`).
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteVectorStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ScribeError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Vector store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Embed and insert documents into a collection. Returns the number stored.
    pub async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| ScribeError::retrieval(collection, e.to_string()))?;
        if vectors.len() != docs.len() {
            return Err(ScribeError::Embedding(format!(
                "expected {} vectors, got {}",
                docs.len(),
                vectors.len()
            )));
        }
        let dims = self.embedder.dimensions();
        if let Some(v) = vectors.iter().find(|v| dims > 0 && v.len() != dims) {
            return Err(ScribeError::Embedding(format!(
                "embedder declared {} dimensions but returned {}",
                dims,
                v.len()
            )));
        }

        self.insert(collection, &docs, &vectors)?;
        info!(collection, count = docs.len(), "Documents added");
        Ok(docs.len())
    }

    /// Chunk a text, tag each chunk with its source, and store the chunks.
    pub async fn ingest_text(
        &self,
        collection: &str,
        source: &str,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<usize> {
        let docs: Vec<Document> = chunk_text(text, chunk_size, chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                Document::new(chunk)
                    .with_meta("source", source)
                    .with_meta("chunk", i as u64)
            })
            .collect();
        self.add_documents(collection, docs).await
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(db_err)?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    fn insert(&self, collection: &str, docs: &[Document], vectors: &[Vec<f32>]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO documents (collection, content, metadata, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(db_err)?;
            for (doc, vector) in docs.iter().zip(vectors) {
                let metadata = serde_json::to_string(&doc.metadata)?;
                stmt.execute(params![collection, doc.content, metadata, encode_embedding(vector)])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)
    }

    fn rank(&self, collection: &str, query_vec: &[f32], limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare("SELECT content, metadata, embedding FROM documents WHERE collection = ?1")
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![collection], |row| {
                let content: String = row.get(0)?;
                let metadata: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok((content, metadata, blob))
            })
            .map_err(db_err)?;

        let mut scored: Vec<Document> = Vec::new();
        let mut mismatched = 0usize;
        for row in rows {
            let (content, metadata, blob) = row.map_err(db_err)?;
            let stored = decode_embedding(&blob);
            // rows embedded by a different model cannot be compared
            if stored.len() != query_vec.len() {
                mismatched += 1;
                continue;
            }
            let sim = cosine_similarity(query_vec, &stored);
            let mut doc = Document::new(content).with_score(sim);
            doc.metadata = serde_json::from_str(&metadata).unwrap_or_default();
            scored.push(doc);
        }

        if mismatched > 0 {
            warn!(
                collection,
                skipped = mismatched,
                dims = query_vec.len(),
                "Skipped documents embedded with a different dimension; re-ingest the collection"
            );
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

impl SimilaritySearch for SqliteVectorStore {
    fn query(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Document>>> {
        let collection = collection.to_string();
        let query = query.to_string();
        Box::pin(async move {
            if limit == 0 {
                return Ok(vec![]);
            }
            let vectors = self
                .embedder
                .embed(std::slice::from_ref(&query))
                .await
                .map_err(|e| ScribeError::retrieval(&collection, e.to_string()))?;
            let query_vec = vectors
                .into_iter()
                .next()
                .ok_or_else(|| ScribeError::retrieval(&collection, "no embedding returned for query"))?;

            let docs = self.rank(&collection, &query_vec, limit)?;
            debug!(collection = %collection, results = docs.len(), "Similarity query");
            Ok(docs)
        })
    }
}
