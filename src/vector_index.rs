//! Vector Index: the capability set the two-tier merger needs for
//! semantic lookup, with a SQLite brute-force backend as the only
//! implementation. Kept behind a trait so a future ANN-backed index
//! (once the corpus outgrows brute force) is a drop-in swap.

use crate::error::Result;
use crate::similarity::cosine_similarity;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub count: usize,
}

#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> Result<()>;
    async fn search(&self, query: &[f32], limit: usize, exclude_id: Option<&str>) -> Result<Vec<SearchHit>>;
    async fn clear(&self) -> Result<()>;
    async fn stats(&self) -> Result<IndexStats>;
}

/// Brute-force cosine scan over a `vectors` table. Acceptable at this
/// crate's scale (single-feed corpora, not a web-scale index) — every
/// search loads all rows and scores them in memory.
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorIndex {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                embedding TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl IndexBackend for SqliteVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        let embedding_json = serde_json::to_string(&record.embedding)?;
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO vectors (id, embedding, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, embedding_json, metadata_json, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize, exclude_id: Option<&str>) -> Result<Vec<SearchHit>> {
        let rows: Vec<(String, String, String)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT id, embedding, metadata FROM vectors")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut scored: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for (id, embedding_json, metadata_json) in rows {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            let metadata: JsonValue = serde_json::from_str(&metadata_json)?;
            let score = cosine_similarity(query, &embedding);
            scored.push(SearchHit { id, score, metadata });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM vectors", [])?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(IndexStats { count: count as usize })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_and_search_ranks_by_similarity() {
        let index = SqliteVectorIndex::new_in_memory().unwrap();
        index.upsert(VectorRecord { id: "a".into(), embedding: vec![1.0, 0.0], metadata: json!({}) }).await.unwrap();
        index.upsert(VectorRecord { id: "b".into(), embedding: vec![0.0, 1.0], metadata: json!({}) }).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_excludes_self() {
        let index = SqliteVectorIndex::new_in_memory().unwrap();
        index.upsert(VectorRecord { id: "a".into(), embedding: vec![1.0, 0.0], metadata: json!({}) }).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 5, Some("a")).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = SqliteVectorIndex::new_in_memory().unwrap();
        index.upsert(VectorRecord { id: "a".into(), embedding: vec![1.0, 0.0], metadata: json!({}) }).await.unwrap();
        index.upsert(VectorRecord { id: "a".into(), embedding: vec![0.0, 1.0], metadata: json!({}) }).await.unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.count, 1);
    }

    #[tokio::test]
    async fn test_clear_empties_index() {
        let index = SqliteVectorIndex::new_in_memory().unwrap();
        index.upsert(VectorRecord { id: "a".into(), embedding: vec![1.0, 0.0], metadata: json!({}) }).await.unwrap();
        index.clear().await.unwrap();
        assert_eq!(index.stats().await.unwrap().count, 0);
    }
}
