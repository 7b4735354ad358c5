//! palank-kb - 지식베이스 검색 엔진
//!
//! 문서를 청킹/임베딩하여 벡터 저장소와 지식 그래프에 인덱싱하고,
//! 벡터 / Agentic(파일시스템) / 하이브리드 전략으로 검색한 결과를
//! 생성 모델에 전달해 근거 있는 답변을 만듭니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod http;
pub mod knowledge;

// Re-exports
pub use config::{get_api_key, get_data_dir, has_api_key, AgenticConfig, EngineConfig, OrphanPolicy};
pub use embedding::{create_embedder, EmbeddingProvider, FallbackEmbedding, OpenAiEmbedding};
pub use error::{RagError, Result};
pub use generation::{ChatMessage, GenerationProvider, OpenAiChat, Role};
pub use knowledge::{
    Document, DocumentType, EngineRegistry, KnowledgeStore, NewDocument, RagAnswer, RagEngine,
    RetrievalContext, RetrieveOptions, Strategy,
};
