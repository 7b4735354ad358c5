//! Knowledge Store - rusqlite 기반 동기 영구 저장소
//!
//! 문서/청크/카테고리/그래프 스냅샷을 소유자별로 저장합니다.
//! 저장 위치: ~/.palank-kb/knowledge.db
//!
//! JSON 필드(메타데이터, 임베딩, 스냅샷)는 텍스트로 저장하며,
//! 읽을 때 손상된 값은 빈 기본값으로 대체합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::Serialize;

use super::document::{
    Category, Chunk, ChunkMetadata, ChunkSearchResult, Document, DocumentStatus, DocumentType,
};
use super::graph::GraphSnapshot;
use crate::config::get_data_dir;

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 영구 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.palank-kb/knowledge.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        }

        Self::open(&data_dir.join("knowledge.db"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                knowledge_base_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                category_id TEXT,
                status TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL DEFAULT 0,
                end_offset INTEGER NOT NULL DEFAULT 0,
                embedding TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                parent_id TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_categories_owner ON categories(owner_id);

            CREATE TABLE IF NOT EXISTS graph_snapshots (
                owner_id TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create tables")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ========================================================================
    // Documents / Chunks
    // ========================================================================

    /// 문서와 청크 저장 (같은 ID면 교체)
    pub fn save_document(&self, doc: &Document) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        tx.execute(
            "INSERT OR REPLACE INTO documents
             (id, knowledge_base_id, owner_id, type, title, content, category_id,
              status, chunk_count, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                doc.id,
                doc.knowledge_base_id,
                doc.owner_id,
                doc.doc_type.as_str(),
                doc.title,
                doc.content,
                doc.category_id,
                doc.status.as_str(),
                doc.chunk_count as i64,
                serde_json::to_string(&doc.metadata)?,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert document")?;

        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc.id])
            .context("Failed to replace chunks")?;

        for chunk in &doc.chunks {
            let embedding = match &chunk.embedding {
                Some(v) => serde_json::to_string(v)?,
                None => "[]".to_string(),
            };
            tx.execute(
                "INSERT INTO chunks
                 (id, document_id, chunk_index, content, start_offset, end_offset, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.id,
                    doc.id,
                    chunk.index as i64,
                    chunk.content,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    embedding,
                    serde_json::to_string(&chunk.metadata)?,
                ],
            )
            .context("Failed to insert chunk")?;
        }

        tx.commit().context("Failed to commit document")?;
        tracing::debug!("Saved document {} ({} chunks)", doc.id, doc.chunks.len());
        Ok(())
    }

    /// 소유자의 모든 문서 로드 (청크 포함, 생성 순)
    pub fn load_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, knowledge_base_id, owner_id, type, title, content, category_id,
                    status, chunk_count, metadata, created_at, updated_at
             FROM documents WHERE owner_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let mut docs: Vec<Document> = stmt
            .query_map(params![owner_id], |row| {
                let id: String = row.get(0)?;
                let metadata: String = row.get(9)?;
                Ok(Document {
                    metadata: parse_json_or_default(&metadata, "document metadata", &id),
                    id,
                    knowledge_base_id: row.get(1)?,
                    owner_id: row.get(2)?,
                    doc_type: DocumentType::parse_lossy(&row.get::<_, String>(3)?),
                    title: row.get(4)?,
                    content: row.get(5)?,
                    category_id: row.get(6)?,
                    status: DocumentStatus::parse_lossy(&row.get::<_, String>(7)?),
                    chunk_count: row.get::<_, i64>(8)?.max(0) as usize,
                    chunks: Vec::new(),
                    created_at: parse_datetime(row.get::<_, String>(10)?),
                    updated_at: parse_datetime(row.get::<_, String>(11)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.chunk_index, c.content, c.start_offset,
                    c.end_offset, c.embedding, c.metadata
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE d.owner_id = ?1
             ORDER BY c.document_id, c.chunk_index",
        )?;

        let mut by_document: HashMap<String, Vec<Chunk>> = HashMap::new();
        let rows = stmt.query_map(params![owner_id], |row| {
            let id: String = row.get(0)?;
            let embedding: String = row.get(6)?;
            let metadata: String = row.get(7)?;
            Ok(Chunk {
                embedding: parse_embedding(&embedding, &id),
                metadata: parse_json_or_default::<ChunkMetadata>(&metadata, "chunk metadata", &id),
                id,
                document_id: row.get(1)?,
                index: row.get::<_, i64>(2)?.max(0) as usize,
                content: row.get(3)?,
                start_offset: row.get::<_, i64>(4)?.max(0) as usize,
                end_offset: row.get::<_, i64>(5)?.max(0) as usize,
            })
        })?;
        for chunk in rows.filter_map(|r| r.ok()) {
            by_document
                .entry(chunk.document_id.clone())
                .or_default()
                .push(chunk);
        }

        for doc in &mut docs {
            if let Some(chunks) = by_document.remove(&doc.id) {
                doc.chunks = chunks;
            }
        }

        Ok(docs)
    }

    /// 문서의 청크 레코드 삭제
    pub fn delete_chunks(&self, document_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        Ok(rows)
    }

    /// 문서 레코드 삭제
    pub fn delete_document(&self, document_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        Ok(rows > 0)
    }

    /// 청크 전문 검색
    ///
    /// 공백으로 나눈 모든 키워드가 포함된 청크만 반환합니다 (LIKE, ASCII 대소문자 무시).
    pub fn search_chunks(&self, owner_id: &str, query: &str, limit: usize) -> Result<Vec<ChunkSearchResult>> {
        let keywords: Vec<&str> = query.split_whitespace().collect();
        if keywords.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conditions = (0..keywords.len())
            .map(|i| format!("c.content LIKE ?{} ESCAPE '\\'", i + 2))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT c.id, c.document_id, d.title, c.chunk_index, c.content, c.metadata
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE d.owner_id = ?1 AND {}
             ORDER BY d.created_at ASC, c.chunk_index ASC
             LIMIT {}",
            conditions, limit
        );

        let mut bindings = vec![owner_id.to_string()];
        bindings.extend(keywords.iter().map(|k| format!("%{}%", escape_like(k))));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_from_iter(bindings.iter()), |row| {
                let chunk_id: String = row.get(0)?;
                let metadata: String = row.get(5)?;
                Ok(ChunkSearchResult {
                    metadata: parse_json_or_default(&metadata, "chunk metadata", &chunk_id),
                    chunk_id,
                    document_id: row.get(1)?,
                    document_title: row.get(2)?,
                    chunk_index: row.get::<_, i64>(3)?.max(0) as usize,
                    content: row.get(4)?,
                    score: 1.0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(results)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub fn save_category(&self, owner_id: &str, category: &Category) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO categories
             (id, owner_id, name, description, parent_id, sort_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                category.id,
                owner_id,
                category.name,
                category.description,
                category.parent_id,
                category.sort_order,
                category.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert category")?;
        Ok(())
    }

    pub fn load_categories(&self, owner_id: &str) -> Result<Vec<Category>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, parent_id, sort_order, created_at
             FROM categories WHERE owner_id = ?1
             ORDER BY sort_order ASC, created_at ASC",
        )?;

        let categories = stmt
            .query_map(params![owner_id], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    parent_id: row.get(3)?,
                    sort_order: row.get(4)?,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(categories)
    }

    /// 카테고리 삭제 (소속 문서는 미분류로)
    pub fn delete_category(&self, category_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE documents SET category_id = NULL WHERE category_id = ?1",
            params![category_id],
        )?;
        let rows = conn.execute("DELETE FROM categories WHERE id = ?1", params![category_id])?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Graph Snapshots
    // ========================================================================

    pub fn save_graph(&self, owner_id: &str, snapshot: &GraphSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize graph")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO graph_snapshots (owner_id, snapshot, updated_at)
             VALUES (?1, ?2, ?3)",
            params![owner_id, json, Utc::now().to_rfc3339()],
        )
        .context("Failed to save graph snapshot")?;
        Ok(())
    }

    /// 그래프 스냅샷 로드 (없거나 손상되면 None)
    pub fn load_graph(&self, owner_id: &str) -> Result<Option<GraphSnapshot>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM graph_snapshots WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )
            .ok();

        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Ignoring malformed graph snapshot for {}: {}", owner_id, e);
                None
            }
        }))
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap_or(0);
        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);
        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM documents",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            document_count: count as usize,
            chunk_count: chunks as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// JSON 텍스트 파싱 (실패 시 기본값 + 경고)
fn parse_json_or_default<T>(raw: &str, what: &str, id: &str) -> T
where
    T: for<'de> serde::Deserialize<'de> + Default,
{
    if raw.trim().is_empty() {
        return T::default();
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Malformed {} for {}: {}", what, id, e);
        T::default()
    })
}

/// 임베딩 텍스트 파싱 (빈 배열/손상 값은 None)
fn parse_embedding(raw: &str, chunk_id: &str) -> Option<Vec<f32>> {
    let vector: Vec<f32> = parse_json_or_default(raw, "embedding", chunk_id);
    if vector.is_empty() {
        None
    } else {
        Some(vector)
    }
}

/// LIKE 패턴 특수 문자 이스케이프
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// Tests
// ============================================================================
