//! 검색 엔진 - 수집, 검색, 답변 생성 통합
//!
//! 소유자 한 명의 지식 베이스, 벡터 저장소, 지식 그래프를 묶어
//! 세 가지 검색 전략(벡터 / Agentic / 하이브리드)을 제공합니다.
//!
//! 각 인메모리 구조는 개별 `RwLock` 뒤에 있으며, 잠금은 프로바이더 호출(`.await`)
//! 사이에서만 잡았다 놓습니다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{EngineConfig, OrphanPolicy};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{ChatMessage, GenerationProvider};

use super::agentic::{AgenticResult, AgenticRetriever};
use super::base::{KnowledgeBase, KnowledgeBaseSettings};
use super::chunker::{extract_keywords, ChunkConfig, DocumentProcessor};
use super::document::{
    Category, ChunkSearchResult, Document, DocumentFilter, DocumentPage, DocumentStatus,
    DocumentType, NewCategory, NewDocument,
};
use super::graph::{
    EntityType, GraphSnapshot, KnowledgeGraph, NewEntity, NewRelation, RelationType, Subgraph,
};
use super::schema::{data_source_document, TableSchema};
use super::store::KnowledgeStore;
use super::vector::{SearchResult, VectorEntry, VectorSnapshot, VectorStore};

// ============================================================================
// Prompts
// ============================================================================

const EXTRACTION_PROMPT: &str = r#"Extract entities and relations from the text and return JSON:
{
  "entities": [
    { "name": "entity name", "type": "concept|person|org|location|time|event|metric", "description": "description" }
  ],
  "relations": [
    { "source": "source entity name", "target": "target entity name", "type": "related_to|belongs_to|part_of|causes", "description": "relation description" }
  ]
}
Return only JSON with no other content. If there are no clear entities or relations, return empty arrays."#;

const ANSWER_PROMPT: &str = "You are an intelligent knowledge assistant. Answer the user's question based on the provided knowledge context.

### Requirements:
1. **Content first**: Prefer the information in the knowledge base. Supplement with your own knowledge only when it is insufficient.
2. **Clear structure**: Use Markdown, with **bold** text and lists where they help readability.
3. **Formatting**:
   - Do not copy relevance scores or other internal ratings into the answer.
   - Avoid long walls of text; state key points as a list.
4. **Honesty**: If you cannot answer, say so directly.
5. **Sources**: You may briefly list the referenced document titles at the end of the answer.";

const OUTLINE_PROMPT: &str = r#"You are a professional writing assistant. Generate a structured article outline from the user's topic and the reference knowledge.
The response must be a valid JSON array where each element has "title" (section title) and "description" (summary of the content).
Example: [{"title": "Introduction", "description": "Background..."}, {"title": "Key points", "description": "..."}]"#;

const SECTION_PROMPT: &str = "You are a professional writer. Write the content of one section from the topic, section title, outline description and reference material.
Requirements:
1. Detailed content with clear logic.
2. Base the section on the reference material. If it is insufficient, reasonable inference is allowed but must stay logical.
3. Use Markdown.
4. Output the content directly without pleasantries.";

const FALLBACK_ANSWER: &str = "Sorry, I could not answer this question.";
const AGENTIC_NOT_FOUND: &str =
    "No relevant knowledge was found. Try another question or check the knowledge base content.";

/// 검색 결과가 없을 때의 신뢰도
const NO_CONTEXT_CONFIDENCE: f32 = 0.3;
const AGENTIC_SUCCESS_CONFIDENCE: f32 = 0.8;
const AGENTIC_FAILURE_CONFIDENCE: f32 = 0.2;
/// 하이브리드 답변에 포함할 최대 행 수
const MAX_DATA_ROWS: usize = 100;
/// 추출된 관계 가중치
const EXTRACTED_RELATION_WEIGHT: f32 = 0.8;
/// 개요 참고 청크 미리보기 길이
const OUTLINE_PREVIEW_CHARS: usize = 200;

static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json\n?").expect("fence regex is valid"));
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```\n?").expect("fence regex is valid"));

// ============================================================================
// Types
// ============================================================================

/// 검색 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// 벡터 + 그래프 검색 후 생성
    #[default]
    Vector,
    /// 파일시스템 점진적 검색
    Agentic,
    /// Agentic 소스를 보충 정보로 사용한 벡터 답변
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Vector => "vector",
            Strategy::Agentic => "agentic",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RagError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vector" => Ok(Strategy::Vector),
            "agentic" => Ok(Strategy::Agentic),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(RagError::Parse(format!(
                "unknown strategy: {} (expected vector|agentic|hybrid)",
                other
            ))),
        }
    }
}

/// 검색 옵션
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// None이면 설정의 `top_k`
    pub top_k: Option<usize>,
    pub category_id: Option<String>,
    /// 지정 시 카테고리 필터보다 우선
    pub document_id: Option<String>,
}

/// 검색된 청크
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
}

/// 인용 출처
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub document_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

/// 검색 컨텍스트
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalContext {
    pub chunks: Vec<RetrievedChunk>,
    /// 매칭 엔티티가 없으면 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Subgraph>,
    /// 문서별 중복 제거 (검색 순서 유지)
    pub sources: Vec<Citation>,
}

/// 답변
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub strategy: Strategy,
    pub answer: String,
    pub confidence: f32,
    pub sources: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RetrievalContext>,
}

/// 외부 데이터 소스 조회 결과 (하이브리드 답변용)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataQueryContext {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub rows: Vec<Value>,
}

/// 개요 항목
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineSection {
    pub title: String,
    pub description: String,
}

/// 엔진 통계
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub knowledge_base_id: String,
    pub documents: usize,
    /// 인덱싱된 벡터 수
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub categories: usize,
    pub by_type: BTreeMap<String, usize>,
    pub total_content_bytes: usize,
    pub dimensions: Vec<usize>,
}

/// 전체 내보내기
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub knowledge_base_id: String,
    pub documents: Vec<Document>,
    pub categories: Vec<Category>,
    pub vectors: VectorSnapshot,
    pub graph: GraphSnapshot,
}

// ============================================================================
// Model Output Parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Extraction {
    entities: Vec<ExtractedEntity>,
    relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedEntity {
    name: Option<String>,
    #[serde(rename = "type")]
    entity_type: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedRelation {
    source: Option<String>,
    target: Option<String>,
    #[serde(rename = "type")]
    relation_type: Option<String>,
    description: Option<String>,
}

/// 코드 펜스 제거
fn strip_fences(raw: &str) -> String {
    let without_open = FENCE_OPEN_RE.replace_all(raw, "");
    FENCE_RE.replace_all(&without_open, "").trim().to_string()
}

fn parse_extraction(raw: &str) -> Result<Extraction> {
    serde_json::from_str(&strip_fences(raw))
        .map_err(|e| RagError::Parse(format!("entity extraction output: {}", e)))
}

/// 개요 파싱 (배열, 또는 `outline`/`chapters`/`sections`로 감싼 객체)
///
/// 파싱할 수 없으면 빈 목록입니다.
fn parse_outline(raw: &str) -> Vec<OutlineSection> {
    let value: Value = match serde_json::from_str(&strip_fences(raw)) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Failed to parse outline JSON: {}", e);
            return vec![];
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => ["outline", "chapters", "sections"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => vec![],
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

// ============================================================================
// RagEngine
// ============================================================================

/// 소유자별 검색 엔진
pub struct RagEngine {
    owner_id: String,
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    store: Option<Arc<KnowledgeStore>>,
    processor: DocumentProcessor,
    agentic: AgenticRetriever,
    knowledge_base: RwLock<KnowledgeBase>,
    vectors: RwLock<VectorStore>,
    graph: RwLock<KnowledgeGraph>,
}

impl RagEngine {
    /// 인메모리 엔진 생성
    pub fn new(
        owner_id: impl Into<String>,
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;

        let owner_id = owner_id.into();
        let knowledge_base = KnowledgeBase::new(
            owner_id.clone(),
            KnowledgeBaseSettings {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                enable_graph: config.enable_graph,
            },
        );
        let graph = KnowledgeGraph::new(knowledge_base.id());

        Ok(Self {
            processor: DocumentProcessor::new(ChunkConfig::new(
                config.chunk_size,
                config.chunk_overlap,
            )),
            agentic: AgenticRetriever::new(config.agentic.clone()),
            owner_id,
            config,
            embedder,
            generator,
            store: None,
            knowledge_base: RwLock::new(knowledge_base),
            vectors: RwLock::new(VectorStore::new()),
            graph: RwLock::new(graph),
        })
    }

    /// 영구 저장소 연결
    pub fn with_store(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn knowledge_base_id(&self) -> String {
        read(&self.knowledge_base).id().to_string()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 문서 추가: 청킹 → 배치 임베딩 → 인덱싱 → (그래프 추출) → 저장
    ///
    /// 임베딩 실패 시 문서는 `failed` 상태로 남고 에러가 반환됩니다.
    /// 그래프 추출과 영구 저장 실패는 로그만 남깁니다.
    pub async fn add_document(&self, new: NewDocument) -> Result<Document> {
        let extract = self.config.enable_graph;
        self.ingest(new, extract).await
    }

    /// 데이터 소스 스키마로 지식 문서를 만들고 그래프를 구성
    pub async fn add_from_data_source(
        &self,
        datasource_id: &str,
        datasource_name: &str,
        tables: &[TableSchema],
        sample_rows: &[Value],
    ) -> Result<Document> {
        let new = data_source_document(datasource_id, datasource_name, tables, sample_rows);
        let doc = self.ingest(new, false).await?;

        let added = write(&self.graph).build_from_schema(tables, datasource_id);
        self.persist_graph();

        tracing::info!(
            "Added data source {} ({} tables, {} entities)",
            datasource_name,
            tables.len(),
            added
        );
        Ok(doc)
    }

    async fn ingest(&self, new: NewDocument, extract: bool) -> Result<Document> {
        let doc = write(&self.knowledge_base).add_document(new);
        let mut chunks = self.processor.create_chunks(&doc.content, &doc.id);

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = match self.embedder.embed_batch(&texts).await {
                Ok(e) if e.len() == texts.len() => e,
                Ok(e) => {
                    let err = anyhow::anyhow!(
                        "expected {} embeddings, received {}",
                        texts.len(),
                        e.len()
                    );
                    return Err(self.fail_document(&doc.id, err));
                }
                Err(e) => return Err(self.fail_document(&doc.id, e)),
            };

            let mut vectors = write(&self.vectors);
            for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
                vectors.add_vector(VectorEntry {
                    chunk_id: chunk.id.clone(),
                    document_id: doc.id.clone(),
                    chunk_index: chunk.index,
                    content: chunk.content.clone(),
                    embedding: embedding.clone(),
                });
                chunk.embedding = Some(embedding);
            }
        }

        let chunk_count = chunks.len();
        let doc = write(&self.knowledge_base)
            .set_chunks(&doc.id, chunks, DocumentStatus::Indexed)
            .cloned()
            .ok_or_else(|| RagError::not_found(doc.id.clone()))?;

        self.persist_document(&doc);

        if extract {
            self.extract_graph(&doc).await;
        }

        tracing::info!("Added document: {} ({} chunks)", doc.title, chunk_count);
        Ok(doc)
    }

    fn fail_document(&self, document_id: &str, err: anyhow::Error) -> RagError {
        tracing::warn!("Embedding failed for document {}: {:#}", document_id, err);
        let failed = {
            let mut kb = write(&self.knowledge_base);
            kb.set_status(document_id, DocumentStatus::Failed);
            kb.get_document(document_id).cloned()
        };
        if let Some(doc) = failed {
            self.persist_document(&doc);
        }
        RagError::provider(err)
    }

    /// 엔티티/관계 추출 (실패해도 계속 진행)
    async fn extract_graph(&self, doc: &Document) {
        match self.try_extract_graph(doc).await {
            Ok((entities, relations)) => {
                tracing::debug!(
                    "Extracted {} entities, {} relations from {}",
                    entities,
                    relations,
                    doc.id
                );
                if entities > 0 {
                    self.persist_graph();
                }
            }
            Err(e) => tracing::warn!("Entity extraction failed for {}: {}", doc.id, e),
        }
    }

    async fn try_extract_graph(&self, doc: &Document) -> Result<(usize, usize)> {
        let input = truncate_chars(&doc.content, self.config.extraction_max_chars);
        let messages = [
            ChatMessage::system(EXTRACTION_PROMPT),
            ChatMessage::user(input),
        ];

        let raw = self
            .generator
            .complete(
                &self.config.chat_model,
                &messages,
                self.config.extraction_temperature,
            )
            .await
            .map_err(RagError::provider)?;
        let extracted = parse_extraction(&raw)?;

        let mut graph = write(&self.graph);
        let mut ids: HashMap<String, String> = HashMap::new();

        for e in extracted.entities {
            let Some(name) = e.name.filter(|n| !n.trim().is_empty()) else {
                continue;
            };
            let entity_type = e
                .entity_type
                .as_deref()
                .map(EntityType::parse_lossy)
                .unwrap_or(EntityType::Concept);
            let entity = graph.add_entity(
                NewEntity::new(entity_type, name.clone())
                    .with_description(e.description)
                    .with_source(&doc.id),
            );
            ids.insert(name, entity.id);
        }

        let mut relations = 0;
        for r in extracted.relations {
            let (Some(source_id), Some(target_id)) = (
                r.source.as_ref().and_then(|s| ids.get(s)),
                r.target.as_ref().and_then(|t| ids.get(t)),
            ) else {
                continue;
            };

            let relation_type = r
                .relation_type
                .as_deref()
                .map(RelationType::parse_lossy)
                .unwrap_or(RelationType::RelatedTo);
            let mut relation =
                NewRelation::new(relation_type, source_id, target_id, EXTRACTED_RELATION_WEIGHT)
                    .with_source(&doc.id);
            if let Some(description) = r.description {
                relation = relation.with_property("description", description);
            }

            if graph.add_relation(relation).is_ok() {
                relations += 1;
            }
        }

        Ok((ids.len(), relations))
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    /// 벡터 + 그래프 검색
    ///
    /// 문서/카테고리 필터가 있으면 `top_k`의 두 배를 찾은 뒤 걸러서 `top_k`개로 자릅니다.
    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<RetrievalContext> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let threshold = self.config.vector_threshold;

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::provider)?;

        let category_docs = match (&options.document_id, &options.category_id) {
            (None, Some(category_id)) => {
                Some(read(&self.knowledge_base).document_ids_in_category(category_id))
            }
            _ => None,
        };

        let hits: Vec<SearchResult> = {
            let vectors = read(&self.vectors);

            let dimensions = vectors.dimensions();
            if dimensions.len() > 1 {
                tracing::warn!(
                    "Vector store holds multiple dimensions {:?}; query uses {} and only matches that dimension",
                    dimensions,
                    query_embedding.len()
                );
            }

            if let Some(ref document_id) = options.document_id {
                vectors
                    .search(&query_embedding, top_k.saturating_mul(2), threshold)
                    .into_iter()
                    .filter(|r| &r.document_id == document_id)
                    .take(top_k)
                    .collect()
            } else if let Some(ref ids) = category_docs {
                vectors
                    .search(&query_embedding, top_k.saturating_mul(2), threshold)
                    .into_iter()
                    .filter(|r| ids.contains(&r.document_id))
                    .take(top_k)
                    .collect()
            } else {
                vectors.search(&query_embedding, top_k, threshold)
            }
        };

        let keywords = extract_keywords(query, self.config.graph_keywords);
        let subgraph = read(&self.graph).query_subgraph(&keywords, self.config.graph_max_entities);

        let kb = read(&self.knowledge_base);
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        let mut chunks = Vec::with_capacity(hits.len());

        for hit in hits {
            let doc = kb.get_document(&hit.document_id);
            if let Some(doc) = doc {
                if seen.insert(doc.id.clone()) {
                    sources.push(Citation {
                        document_id: doc.id.clone(),
                        title: doc.title.clone(),
                        doc_type: doc.doc_type,
                        content: hit.content.clone(),
                        relevance: None,
                    });
                }
            }

            chunks.push(RetrievedChunk {
                document_title: doc.map(|d| d.title.clone()).unwrap_or_default(),
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                chunk_index: hit.chunk_index,
                content: hit.content,
                score: hit.similarity,
            });
        }

        tracing::debug!(
            "Retrieved {} chunks, {} entities for {:?}",
            chunks.len(),
            subgraph.entities.len(),
            query
        );

        Ok(RetrievalContext {
            chunks,
            graph: (!subgraph.is_empty()).then_some(subgraph),
            sources,
        })
    }

    /// 벡터 검색 기반 답변
    pub async fn answer(
        &self,
        query: &str,
        extra_context: Option<&str>,
        options: &RetrieveOptions,
    ) -> Result<RagAnswer> {
        let context = self.retrieve(query, options).await?;
        let context_text = build_context_text(&context, extra_context, self.config.answer_entities);

        let messages = [
            ChatMessage::system(ANSWER_PROMPT),
            ChatMessage::user(format!(
                "Knowledge context:\n{}\n\nUser question: {}",
                context_text, query
            )),
        ];
        let answer = self
            .generator
            .complete(&self.config.chat_model, &messages, self.config.answer_temperature)
            .await
            .map_err(RagError::provider)?;
        let answer = if answer.trim().is_empty() {
            FALLBACK_ANSWER.to_string()
        } else {
            answer
        };

        let confidence = if context.chunks.is_empty() {
            NO_CONTEXT_CONFIDENCE
        } else {
            context.chunks.iter().map(|c| c.score).sum::<f32>() / context.chunks.len() as f32
        };

        Ok(RagAnswer {
            strategy: Strategy::Vector,
            answer,
            confidence,
            sources: context.sources.clone(),
            context: Some(context),
        })
    }

    /// 데이터 소스 조회 결과를 보충 정보로 붙인 답변
    pub async fn hybrid_answer(
        &self,
        query: &str,
        data: &DataQueryContext,
        options: &RetrieveOptions,
    ) -> Result<RagAnswer> {
        let extra = describe_data_query(data);
        let extra = (!extra.is_empty()).then_some(extra.as_str());
        self.answer(query, extra, options).await
    }

    /// 파일시스템 검색 결과로 답변 (생성 모델 호출 없음)
    pub async fn agentic_answer(&self, query: &str) -> RagAnswer {
        let result = self.agentic.retrieve(query).await;

        let answer = if result.success {
            format!(
                "Based on the knowledge base, the following relevant information was found:\n\n{}",
                result
                    .sources
                    .iter()
                    .map(|s| s.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            )
        } else {
            AGENTIC_NOT_FOUND.to_string()
        };

        RagAnswer {
            strategy: Strategy::Agentic,
            answer,
            confidence: if result.success {
                AGENTIC_SUCCESS_CONFIDENCE
            } else {
                AGENTIC_FAILURE_CONFIDENCE
            },
            sources: agentic_citations(&result),
            context: None,
        }
    }

    /// 전략별 질의
    pub async fn ask(
        &self,
        query: &str,
        strategy: Strategy,
        options: &RetrieveOptions,
    ) -> Result<RagAnswer> {
        match strategy {
            Strategy::Vector => self.answer(query, None, options).await,
            Strategy::Agentic => Ok(self.agentic_answer(query).await),
            Strategy::Hybrid => {
                let found = self.agentic.retrieve(query).await;
                let extra = found
                    .sources
                    .iter()
                    .map(|s| s.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let extra = (!extra.is_empty()).then_some(extra.as_str());

                let mut answer = self.answer(query, extra, options).await?;
                answer.strategy = Strategy::Hybrid;
                answer.sources.extend(agentic_citations(&found));
                Ok(answer)
            }
        }
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// 주제 개요 생성
    pub async fn generate_outline(
        &self,
        topic: &str,
        category_id: Option<&str>,
    ) -> Result<Vec<OutlineSection>> {
        let options = RetrieveOptions {
            category_id: category_id.map(String::from),
            ..Default::default()
        };
        let context = self.retrieve(topic, &options).await?;

        let mut context_text = String::new();
        if !context.chunks.is_empty() {
            context_text.push_str("### Reference knowledge:\n");
            for chunk in &context.chunks {
                context_text.push_str(&format!(
                    "- {}...\n",
                    truncate_chars(&chunk.content, OUTLINE_PREVIEW_CHARS)
                ));
            }
        }

        let messages = [
            ChatMessage::system(OUTLINE_PROMPT),
            ChatMessage::user(format!(
                "Topic: {}\n\n{}\n\nGenerate the outline:",
                topic, context_text
            )),
        ];
        let raw = self
            .generator
            .complete(&self.config.chat_model, &messages, self.config.answer_temperature)
            .await
            .map_err(RagError::provider)?;

        Ok(parse_outline(&raw))
    }

    /// 개요 한 항목의 본문 생성
    pub async fn generate_section(
        &self,
        topic: &str,
        section: &OutlineSection,
        category_id: Option<&str>,
    ) -> Result<String> {
        let query = format!("{} {} {}", topic, section.title, section.description);
        let options = RetrieveOptions {
            category_id: category_id.map(String::from),
            ..Default::default()
        };
        let context = self.retrieve(&query, &options).await?;

        let references = context
            .chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = [
            ChatMessage::system(SECTION_PROMPT),
            ChatMessage::user(format!(
                "Article topic: {}\nSection title: {}\nSection requirements: {}\n\n### Reference material:\n{}\n\nWrite this section:",
                topic, section.title, section.description, references
            )),
        ];

        self.generator
            .complete(&self.config.chat_model, &messages, self.config.answer_temperature)
            .await
            .map_err(RagError::provider)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub fn get_document(&self, id: &str) -> Option<Document> {
        read(&self.knowledge_base).get_document(id).cloned()
    }

    pub fn list_documents(&self, filter: &DocumentFilter) -> DocumentPage {
        read(&self.knowledge_base).list(filter)
    }

    /// 문서 삭제: 벡터 → 청크 레코드 → 문서 레코드 순서
    ///
    /// 각 단계는 여러 번 실행해도 안전합니다. 문서가 있었으면 true.
    pub fn delete_document(&self, id: &str) -> bool {
        let removed_vectors = write(&self.vectors).delete_document_vectors(id);

        if let Some(ref store) = self.store {
            if let Err(e) = store.delete_chunks(id) {
                tracing::warn!("Failed to delete stored chunks for {}: {:#}", id, e);
            }
            if let Err(e) = store.delete_document(id) {
                tracing::warn!("Failed to delete stored document {}: {:#}", id, e);
            }
        }

        let removed = write(&self.knowledge_base).delete_document(id).is_some();

        if self.config.orphan_policy == OrphanPolicy::Remove {
            let (entities, relations) = write(&self.graph).remove_by_source_document(id);
            if entities + relations > 0 {
                tracing::debug!(
                    "Removed {} entities, {} relations sourced from {}",
                    entities,
                    relations,
                    id
                );
                self.persist_graph();
            }
        }

        if removed {
            tracing::info!("Deleted document {} ({} vectors)", id, removed_vectors);
        }
        removed
    }

    /// 청크 전문 검색 (모든 키워드 포함)
    ///
    /// 저장소가 있으면 저장소에서, 없으면 메모리에서 검색합니다.
    pub fn search_chunks(&self, query: &str, limit: usize) -> Vec<ChunkSearchResult> {
        match self.store {
            Some(ref store) => store
                .search_chunks(&self.owner_id, query, limit)
                .unwrap_or_else(|e| {
                    tracing::warn!("Full-text search failed: {:#}", e);
                    vec![]
                }),
            None => read(&self.knowledge_base).search_chunks(query, limit),
        }
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub fn create_category(&self, new: NewCategory) -> Category {
        let category = write(&self.knowledge_base).add_category(new);
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_category(&self.owner_id, &category) {
                tracing::warn!("Failed to save category {}: {:#}", category.id, e);
            }
        }
        category
    }

    pub fn list_categories(&self) -> Vec<Category> {
        read(&self.knowledge_base).categories()
    }

    /// 카테고리 삭제 (소속 문서는 미분류로)
    pub fn delete_category(&self, id: &str) -> bool {
        let removed = write(&self.knowledge_base).delete_category(id);
        if let Some(ref store) = self.store {
            if let Err(e) = store.delete_category(id) {
                tracing::warn!("Failed to delete stored category {}: {:#}", id, e);
            }
        }
        removed
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// 저장소에서 소유자의 문서, 카테고리, 그래프 복원
    ///
    /// 임베딩이 있는 청크는 벡터 저장소에 다시 등록됩니다. 반환값: 불러온 문서 수
    pub fn load_from_database(&self) -> Result<usize> {
        let Some(ref store) = self.store else {
            tracing::debug!("No durable store configured, skipping load");
            return Ok(0);
        };

        let documents = store
            .load_documents(&self.owner_id)
            .map_err(RagError::storage)?;
        let categories = store
            .load_categories(&self.owner_id)
            .map_err(RagError::storage)?;
        let snapshot = store.load_graph(&self.owner_id).unwrap_or_else(|e| {
            tracing::warn!("Failed to load graph snapshot: {:#}", e);
            None
        });

        let count = documents.len();
        let mut vector_count = 0;
        {
            let mut vectors = write(&self.vectors);
            for doc in &documents {
                for chunk in &doc.chunks {
                    let Some(ref embedding) = chunk.embedding else {
                        continue;
                    };
                    if embedding.is_empty() {
                        continue;
                    }
                    vectors.add_vector(VectorEntry {
                        chunk_id: chunk.id.clone(),
                        document_id: doc.id.clone(),
                        chunk_index: chunk.index,
                        content: chunk.content.clone(),
                        embedding: embedding.clone(),
                    });
                    vector_count += 1;
                }
            }
        }

        {
            let mut kb = write(&self.knowledge_base);
            for doc in documents {
                kb.insert_document(doc);
            }
            for category in categories {
                kb.insert_category(category);
            }
        }

        if let Some(snapshot) = snapshot {
            write(&self.graph).import(snapshot);
        }

        tracing::info!(
            "Loaded {} documents ({} vectors) for owner {}",
            count,
            vector_count,
            self.owner_id
        );
        Ok(count)
    }

    fn persist_document(&self, doc: &Document) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_document(doc) {
                tracing::warn!("Failed to save document {}: {:#}", doc.id, e);
            }
        }
    }

    fn persist_graph(&self) {
        if let Some(ref store) = self.store {
            let snapshot = read(&self.graph).export();
            if let Err(e) = store.save_graph(&self.owner_id, &snapshot) {
                tracing::warn!("Failed to save graph snapshot: {:#}", e);
            }
        }
    }

    // ========================================================================
    // Stats / Export
    // ========================================================================

    pub fn stats(&self) -> EngineStats {
        let (knowledge_base_id, docs) = {
            let kb = read(&self.knowledge_base);
            (kb.id().to_string(), kb.stats())
        };
        let vectors = read(&self.vectors).stats();
        let graph = read(&self.graph).stats();

        EngineStats {
            knowledge_base_id,
            documents: docs.documents,
            chunks: vectors.total_vectors,
            entities: graph.entities,
            relations: graph.relations,
            categories: docs.categories,
            by_type: docs.by_type,
            total_content_bytes: docs.total_content_bytes,
            dimensions: vectors.dimensions,
        }
    }

    pub fn export_data(&self) -> EngineSnapshot {
        let (knowledge_base_id, documents, categories) = {
            let kb = read(&self.knowledge_base);
            (
                kb.id().to_string(),
                kb.documents().cloned().collect(),
                kb.categories(),
            )
        };

        EngineSnapshot {
            knowledge_base_id,
            documents,
            categories,
            vectors: read(&self.vectors).export(),
            graph: read(&self.graph).export(),
        }
    }

    /// 그래프 직접 조회 (읽기 전용)
    pub fn with_graph<R>(&self, f: impl FnOnce(&KnowledgeGraph) -> R) -> R {
        f(&read(&self.graph))
    }
}

impl fmt::Debug for RagEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagEngine")
            .field("owner_id", &self.owner_id)
            .field("embedder", &self.embedder.name())
            .field("generator", &self.generator.name())
            .field("store", &self.store.as_ref().map(|s| s.db_path().to_path_buf()))
            .finish()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// 답변 프롬프트용 컨텍스트 텍스트
fn build_context_text(
    context: &RetrievalContext,
    extra_context: Option<&str>,
    max_entities: usize,
) -> String {
    let mut text = String::new();

    if !context.chunks.is_empty() {
        text.push_str("### Relevant knowledge snippets:\n");
        for chunk in &context.chunks {
            text.push_str(&format!(
                "\n[Relevance: {:.1}%]\n{}\n",
                chunk.score * 100.0,
                chunk.content
            ));
        }
    }

    if let Some(ref graph) = context.graph {
        text.push_str("\n### Related entities:\n");
        for entity in graph.entities.iter().take(max_entities) {
            let alias = entity
                .alias
                .as_deref()
                .filter(|a| !a.is_empty())
                .map(|a| format!("({})", a))
                .unwrap_or_default();
            let description = entity
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or(entity.entity_type.as_str());
            text.push_str(&format!("- {}{}: {}\n", entity.name, alias, description));
        }
    }

    if let Some(extra) = extra_context.filter(|e| !e.is_empty()) {
        text.push_str(&format!("\n### Supplementary information:\n{}\n", extra));
    }

    text
}

fn describe_data_query(data: &DataQueryContext) -> String {
    let mut text = String::new();
    if let Some(sql) = data.sql.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Executed SQL: {}\n", sql));
    }
    if !data.rows.is_empty() {
        let rows = &data.rows[..data.rows.len().min(MAX_DATA_ROWS)];
        let json = serde_json::to_string_pretty(rows).unwrap_or_default();
        text.push_str(&format!("Query results ({} rows):\n{}\n", data.rows.len(), json));
    }
    text
}

fn agentic_citations(result: &AgenticResult) -> Vec<Citation> {
    result
        .sources
        .iter()
        .map(|s| Citation {
            document_id: s.file.display().to_string(),
            title: s
                .file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| s.file.display().to_string()),
            doc_type: DocumentType::Document,
            content: s.content.clone(),
            relevance: Some(s.relevance),
        })
        .collect()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgenticConfig;
    use crate::generation::Role;
    use crate::knowledge::schema::ColumnSchema;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const VOCABULARY: &[&str] = &["rust", "ownership", "borrow", "python", "garden", "tomato", "revenue"];

    /// 어휘 빈도 기반 결정적 임베딩
    struct VocabEmbedding;

    #[async_trait]
    impl EmbeddingProvider for VocabEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(VOCABULARY
                .iter()
                .map(|w| lower.matches(w).count() as f32)
                .collect())
        }

        fn dimension(&self) -> usize {
            VOCABULARY.len()
        }

        fn name(&self) -> &str {
            "vocab"
        }
    }

    struct BrokenEmbedding;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("service unavailable")
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// 추출 요청에는 고정 JSON, 나머지에는 고정 답변
    #[derive(Default)]
    struct ScriptedChat {
        extraction: String,
        reply: String,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedChat {
        fn new(extraction: &str, reply: &str) -> Self {
            Self {
                extraction: extraction.to_string(),
                reply: reply.to_string(),
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedChat {
        async fn complete(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _temperature: f32,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            if messages[0].content == EXTRACTION_PROMPT {
                if messages[1].content.contains("Rust") {
                    return Ok(self.extraction.clone());
                }
                return Ok("{}".to_string());
            }
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    const RUST_EXTRACTION: &str = "```json\n{\"entities\":[{\"name\":\"Rust\",\"type\":\"concept\",\"description\":\"A systems language\"},{\"name\":\"Ownership\"}],\"relations\":[{\"source\":\"Rust\",\"target\":\"Ownership\",\"description\":\"core idea\"},{\"source\":\"Rust\",\"target\":\"Unknown\"}]}\n```";

    fn engine_with(config: EngineConfig, chat: Arc<ScriptedChat>) -> RagEngine {
        RagEngine::new("user-1", config, Arc::new(VocabEmbedding), chat).unwrap()
    }

    fn engine() -> (RagEngine, Arc<ScriptedChat>) {
        let chat = Arc::new(ScriptedChat::new(RUST_EXTRACTION, "Rust uses ownership."));
        (engine_with(EngineConfig::default(), chat.clone()), chat)
    }

    fn rust_doc() -> NewDocument {
        NewDocument::new("Rust Guide", "Rust ownership and borrow rules keep memory safe.")
    }

    fn garden_doc() -> NewDocument {
        NewDocument::new("Garden", "Tomato garden tips for summer.").with_type(DocumentType::Note)
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_index() {
        let (engine, _) = engine();
        let context = engine
            .retrieve("rust ownership", &RetrieveOptions::default())
            .await
            .unwrap();

        assert!(context.chunks.is_empty());
        assert!(context.graph.is_none());
        assert!(context.sources.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_and_answer() {
        let (engine, chat) = engine();
        let rust = engine.add_document(rust_doc()).await.unwrap();
        engine.add_document(garden_doc()).await.unwrap();

        assert_eq!(rust.status, DocumentStatus::Indexed);
        assert_eq!(rust.chunk_count, 1);
        assert!(rust.chunks[0].embedding.is_some());
        assert_eq!(rust.knowledge_base_id, "kb-user-1");

        let stats = engine.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.relations, 1);

        let answer = engine
            .answer("rust ownership", None, &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.answer, "Rust uses ownership.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document_id, rust.id);
        assert!((answer.confidence - 2.0 / 6f32.sqrt()).abs() < 1e-4);

        let context = answer.context.unwrap();
        assert_eq!(context.chunks.len(), 1);
        assert!(context.graph.is_some());

        let calls = chat.calls();
        let prompt = &calls.last().unwrap()[1];
        assert_eq!(prompt.role, Role::User);
        assert!(prompt.content.contains("[Relevance: 81.6%]"));
        assert!(prompt.content.contains("- Rust: A systems language"));
        assert!(prompt.content.contains("- Ownership: concept"));
        assert!(prompt.content.ends_with("User question: rust ownership"));
    }

    #[tokio::test]
    async fn test_answer_without_context_has_low_confidence() {
        let (engine, _) = engine();
        let answer = engine
            .answer("python", None, &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.confidence, NO_CONTEXT_CONFIDENCE);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_filters() {
        let (engine, _) = engine();
        let category = engine.create_category(NewCategory::new("Languages"));
        let rust = engine
            .add_document(rust_doc().with_category(&category.id))
            .await
            .unwrap();
        let other = engine
            .add_document(NewDocument::new("Borrowing", "Borrow checker and ownership in rust."))
            .await
            .unwrap();

        let by_category = RetrieveOptions {
            category_id: Some(category.id.clone()),
            ..Default::default()
        };
        let context = engine.retrieve("rust ownership", &by_category).await.unwrap();
        assert_eq!(context.chunks.len(), 1);
        assert_eq!(context.chunks[0].document_id, rust.id);

        let by_document = RetrieveOptions {
            document_id: Some(other.id.clone()),
            category_id: Some(category.id),
            ..Default::default()
        };
        let context = engine.retrieve("rust ownership", &by_document).await.unwrap();
        assert!(context.chunks.iter().all(|c| c.document_id == other.id));
        assert_eq!(context.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_filter_with_huge_top_k() {
        let (engine, _) = engine();
        let rust = engine.add_document(rust_doc()).await.unwrap();
        engine.add_document(garden_doc()).await.unwrap();

        let options = RetrieveOptions {
            top_k: Some(usize::MAX),
            document_id: Some(rust.id.clone()),
            ..Default::default()
        };
        let context = engine.retrieve("rust ownership", &options).await.unwrap();
        assert!(!context.chunks.is_empty());
        assert!(context.chunks.iter().all(|c| c.document_id == rust.id));
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_document_failed() {
        let chat = Arc::new(ScriptedChat::default());
        let engine =
            RagEngine::new("user-1", EngineConfig::default(), Arc::new(BrokenEmbedding), chat.clone())
                .unwrap();

        let err = engine.add_document(rust_doc()).await.unwrap_err();
        assert!(matches!(err, RagError::Provider(_)));

        let page = engine.list_documents(&DocumentFilter::default());
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status, DocumentStatus::Failed);
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_extraction_is_not_fatal() {
        let chat = Arc::new(ScriptedChat::new("not json at all", "ok"));
        let engine = engine_with(EngineConfig::default(), chat);

        let doc = engine.add_document(rust_doc()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert_eq!(engine.stats().entities, 0);
    }

    #[tokio::test]
    async fn test_add_from_data_source() {
        let (engine, chat) = engine();
        let tables = vec![TableSchema::new(
            "orders",
            vec![
                ColumnSchema::new("id", "int"),
                ColumnSchema::new("revenue", "decimal"),
            ],
        )];
        let rows = vec![serde_json::json!({"id": 1, "revenue": 9.5})];

        let doc = engine
            .add_from_data_source("ds-1", "Sales DB", &tables, &rows)
            .await
            .unwrap();

        assert_eq!(doc.doc_type, DocumentType::Datasource);
        assert!(doc.content.contains("Table: orders"));
        let stats = engine.stats();
        assert_eq!(stats.entities, 3);
        assert_eq!(stats.relations, 2);
        assert!(chat.calls().is_empty());

        let context = engine
            .retrieve("revenue", &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(context.sources[0].doc_type, DocumentType::Datasource);
        let graph = context.graph.unwrap();
        assert!(graph.entities.iter().any(|e| e.name == "orders"));
    }

    #[tokio::test]
    async fn test_delete_document_cascade() {
        let mut config = EngineConfig::default();
        config.orphan_policy = OrphanPolicy::Remove;
        let chat = Arc::new(ScriptedChat::new(RUST_EXTRACTION, "ok"));
        let engine = engine_with(config, chat);

        let rust = engine.add_document(rust_doc()).await.unwrap();
        let garden = engine.add_document(garden_doc()).await.unwrap();
        assert_eq!(engine.stats().entities, 2);

        assert!(engine.delete_document(&rust.id));
        assert!(!engine.delete_document(&rust.id));

        let stats = engine.stats();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.entities, 0);
        assert!(engine.get_document(&rust.id).is_none());
        assert!(engine.get_document(&garden.id).is_some());
    }

    #[tokio::test]
    async fn test_delete_keeps_graph_by_default() {
        let (engine, _) = engine();
        let rust = engine.add_document(rust_doc()).await.unwrap();

        assert!(engine.delete_document(&rust.id));
        assert_eq!(engine.stats().chunks, 0);
        assert_eq!(engine.stats().entities, 2);
    }

    #[tokio::test]
    async fn test_load_from_database() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KnowledgeStore::open(&dir.path().join("kb.db")).unwrap());

        let (first, _) = engine();
        let first = first.with_store(store.clone());
        let category = first.create_category(NewCategory::new("Docs"));
        let rust = first
            .add_document(rust_doc().with_category(&category.id))
            .await
            .unwrap();
        first.add_document(garden_doc()).await.unwrap();

        let (second, _) = engine();
        let second = second.with_store(store);
        assert_eq!(second.load_from_database().unwrap(), 2);

        let stats = second.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.categories, 1);
        assert_eq!(stats.entities, 2);

        let context = second
            .retrieve("rust ownership", &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(context.sources[0].document_id, rust.id);

        let hits = second.search_chunks("BORROW rules", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_title, "Rust Guide");
    }

    #[tokio::test]
    async fn test_load_without_store_is_noop() {
        let (engine, _) = engine();
        assert_eq!(engine.load_from_database().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_chunks_in_memory() {
        let (engine, _) = engine();
        engine.add_document(rust_doc()).await.unwrap();
        engine.add_document(garden_doc()).await.unwrap();

        assert_eq!(engine.search_chunks("tomato summer", 10).len(), 1);
        assert!(engine.search_chunks("tomato rust", 10).is_empty());
        assert!(engine.search_chunks("   ", 10).is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_answer_includes_data_query() {
        let (engine, chat) = engine();
        let data = DataQueryContext {
            sql: Some("SELECT id FROM orders".to_string()),
            rows: vec![serde_json::json!({"id": 1})],
        };

        engine
            .hybrid_answer("orders", &data, &RetrieveOptions::default())
            .await
            .unwrap();

        let calls = chat.calls();
        let prompt = &calls.last().unwrap()[1].content;
        assert!(prompt.contains("### Supplementary information:"));
        assert!(prompt.contains("Executed SQL: SELECT id FROM orders"));
        assert!(prompt.contains("Query results (1 rows):"));
    }

    #[tokio::test]
    async fn test_ask_strategies() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "Tomato planting schedule.").unwrap();

        let mut config = EngineConfig::default();
        config.agentic = AgenticConfig::with_root(dir.path());
        config.agentic.use_grep = false;
        let chat = Arc::new(ScriptedChat::new("{}", "answer"));
        let engine = engine_with(config, chat.clone());

        let agentic = engine
            .ask("tomato schedule", Strategy::Agentic, &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(agentic.strategy, Strategy::Agentic);
        assert_eq!(agentic.confidence, AGENTIC_SUCCESS_CONFIDENCE);
        assert_eq!(agentic.sources[0].title, "notes.md");
        assert!(agentic.answer.contains("Tomato planting schedule."));
        assert!(chat.calls().is_empty());

        let missing = engine.agentic_answer("xylophone").await;
        assert_eq!(missing.confidence, AGENTIC_FAILURE_CONFIDENCE);
        assert_eq!(missing.answer, AGENTIC_NOT_FOUND);

        let hybrid = engine
            .ask("tomato schedule", Strategy::Hybrid, &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(hybrid.strategy, Strategy::Hybrid);
        assert_eq!(hybrid.answer, "answer");
        assert_eq!(hybrid.sources.len(), 1);
        let prompt = chat.calls()[0][1].content.clone();
        assert!(prompt.contains("Tomato planting schedule."));
    }

    #[tokio::test]
    async fn test_generate_outline_and_section() {
        let chat = Arc::new(ScriptedChat::new(
            "{}",
            r#"{"chapters": [{"title": "Intro", "description": "Why"}, {"title": "Body"}]}"#,
        ));
        let engine = engine_with(EngineConfig::default(), chat.clone());

        let outline = engine.generate_outline("rust", None).await.unwrap();
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[1].title, "Body");
        assert_eq!(outline[1].description, "");

        let section = engine.generate_section("rust", &outline[0], None).await.unwrap();
        assert!(section.contains("chapters"));
        let prompt = chat.calls()[1][1].content.clone();
        assert!(prompt.contains("Section title: Intro"));
    }

    #[test]
    fn test_parse_outline_variants() {
        let array = parse_outline(r#"[{"title":"A","description":"a"}]"#);
        assert_eq!(array, vec![OutlineSection { title: "A".into(), description: "a".into() }]);

        assert_eq!(parse_outline("```json\n{\"outline\":[{\"title\":\"B\"}]}\n```").len(), 1);
        assert_eq!(parse_outline(r#"{"sections":[{"title":"C"}]}"#)[0].title, "C");
        assert!(parse_outline(r#"{"other": 1}"#).is_empty());
        assert!(parse_outline("not json").is_empty());
    }

    #[test]
    fn test_parse_extraction_strips_fences() {
        let extracted = parse_extraction(RUST_EXTRACTION).unwrap();
        assert_eq!(extracted.entities.len(), 2);
        assert_eq!(extracted.relations.len(), 2);
        assert!(extracted.entities[1].entity_type.is_none());

        let empty = parse_extraction("```JSON\n{}\n```").unwrap();
        assert!(empty.entities.is_empty());
        assert!(matches!(parse_extraction("[oops"), Err(RagError::Parse(_))));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Agentic".parse::<Strategy>().unwrap(), Strategy::Agentic);
        assert!("graph".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.chunk_overlap = config.chunk_size;
        let err = RagEngine::new(
            "u",
            config,
            Arc::new(VocabEmbedding),
            Arc::new(ScriptedChat::default()),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
