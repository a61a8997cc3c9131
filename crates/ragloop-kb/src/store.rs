use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use ragloop_core::config::KnowledgeBaseConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::KnowledgeBaseSearch;
use ragloop_core::types::EvidenceItem;

use crate::ingest::{load_folder, DocumentChunk};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        title TEXT,
        content TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);

    CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
        content,
        title,
        source UNINDEXED,
        tokenize='unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
        INSERT INTO chunks_fts(rowid, content, title, source)
        VALUES (new.id, new.content, new.title, new.source);
    END;

    CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
        DELETE FROM chunks_fts WHERE rowid = old.id;
    END;";

/// Summary of an ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
}

/// SQLite-backed knowledge base with FTS5 full-text search.
pub struct SqliteKnowledgeBase {
    conn: Mutex<Connection>,
}

fn db_err(e: impl ToString) -> RagError {
    RagError::Database(e.to_string())
}

impl SqliteKnowledgeBase {
    /// Open or create a knowledge base at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Knowledge base opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory knowledge base (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert chunks, replacing any chunks previously stored for the same
    /// sources. Runs in one transaction.
    pub fn replace_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;

        let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        for source in &sources {
            tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])
                .map_err(db_err)?;
        }
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (source, title, content) VALUES (?1, ?2, ?3)",
                params![chunk.source, chunk.title, chunk.content],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(chunks.len())
    }

    /// Load a documents folder and index it.
    pub fn ingest_folder(&self, dir: &Path, config: &KnowledgeBaseConfig) -> Result<IngestReport> {
        let chunks = load_folder(dir, &config.extensions, config.chunk_size, config.chunk_overlap)?;
        let documents = chunks
            .iter()
            .map(|c| c.source.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let inserted = self.replace_chunks(&chunks)?;
        info!(dir = %dir.display(), documents, chunks = inserted, "Ingested documents");
        Ok(IngestReport {
            documents,
            chunks: inserted,
        })
    }

    /// Number of stored chunks.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(db_err)?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Full-text search ranked by BM25, best first.
    pub fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceItem>> {
        let Some(query) = fts_query(text) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock().map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT source, title, content, bm25(chunks_fts)
                 FROM chunks_fts
                 WHERE chunks_fts MATCH ?1
                 ORDER BY bm25(chunks_fts)
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![query, k as i64], |row| {
                let source: String = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                let content: String = row.get(2)?;
                let rank: f64 = row.get(3)?;
                Ok((source, title, content, rank))
            })
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            let (source, title, content, rank) = row.map_err(db_err)?;
            // bm25() is lower-is-better
            let mut item = EvidenceItem::kb(&source, content).with_score(-rank);
            item.title = title;
            results.push(item);
        }
        Ok(results)
    }
}

/// Build an FTS5 MATCH expression: every word quoted as a prefix term,
/// joined with OR. `None` when the text has no searchable words.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"*", w.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl KnowledgeBaseSearch for SqliteKnowledgeBase {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        Box::pin(async move { self.search(text, k) })
    }
}
