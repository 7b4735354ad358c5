//! Knowledge 모듈 - 지식 베이스 검색 엔진
//!
//! - Chunker: 경계 인식 텍스트 분할 + 키워드 추출
//! - Vector: 인메모리 코사인 유사도 검색
//! - Graph: 엔티티/관계 그래프와 서브그래프 조회
//! - Agentic: 파일시스템 grep 기반 점진적 검색
//! - Store: SQLite 영구 저장 (선택)
//! - Engine: 수집과 세 가지 검색 전략 통합
//! - Registry: 소유자별 엔진 캐시

mod agentic;
mod base;
mod chunker;
mod document;
mod engine;
mod graph;
mod registry;
mod schema;
mod store;
mod vector;

// Re-exports
pub use agentic::{
    alternative_keywords, extract_relevant, parse_directory_index, AgenticResult,
    AgenticRetriever, AgenticSource, IndexEntry,
};
pub use base::{DocumentStats, KnowledgeBase, KnowledgeBaseSettings};
pub use chunker::{extract_keywords, ChunkConfig, DocumentProcessor, TextSpan};
pub use document::{
    Category, Chunk, ChunkMetadata, ChunkSearchResult, Document, DocumentFilter, DocumentPage,
    DocumentStatus, DocumentType, Metadata, NewCategory, NewDocument,
};
pub use engine::{
    Citation, DataQueryContext, EngineSnapshot, EngineStats, OutlineSection, RagAnswer,
    RagEngine, RetrievalContext, RetrieveOptions, RetrievedChunk, Strategy,
};
pub use graph::{
    Entity, EntityType, GraphSnapshot, GraphStats, KnowledgeGraph, NewEntity, NewRelation,
    Relation, RelationType, Subgraph,
};
pub use registry::EngineRegistry;
pub use schema::{data_source_document, ColumnSchema, TableSchema, MAX_SAMPLE_ROWS};
pub use store::{KnowledgeStore, StoreStats};
pub use vector::{cosine_similarity, SearchResult, VectorEntry, VectorSnapshot, VectorStats, VectorStore};
