//! 문서/청크/카테고리 데이터 모델

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// 자유 형식 메타데이터 맵
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Document
// ============================================================================

/// 문서 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Datasource,
    #[default]
    Document,
    Webpage,
    Note,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Datasource => "datasource",
            DocumentType::Document => "document",
            DocumentType::Webpage => "webpage",
            DocumentType::Note => "note",
        }
    }

    /// 저장된 문자열 해석 (알 수 없는 값은 `document`)
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "datasource" => Ok(DocumentType::Datasource),
            "document" => Ok(DocumentType::Document),
            "webpage" => Ok(DocumentType::Webpage),
            "note" => Ok(DocumentType::Note),
            other => Err(RagError::Parse(format!("unknown document type: {}", other))),
        }
    }
}

/// 문서 인덱싱 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "indexed" => DocumentStatus::Indexed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub knowledge_base_id: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 문서 추가 요청
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub category_id: Option<String>,
    pub metadata: Metadata,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, doc_type: DocumentType) -> Self {
        self.doc_type = doc_type;
        self
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 청크 구조 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_range: Option<(usize, usize)>,
}

/// 문서 청크
///
/// 생성 후에는 임베딩 부착 외에 변경되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// 청크 전문 검색 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

// ============================================================================
// Category
// ============================================================================

/// 문서 카테고리
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

/// 카테고리 생성 요청
#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub sort_order: i64,
}

impl NewCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Listing
// ============================================================================

/// 문서 목록 필터
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub doc_type: Option<DocumentType>,
    pub category_id: Option<String>,
    /// 제목/본문 부분 일치 (대소문자 무시)
    pub keyword: Option<String>,
    pub status: Option<DocumentStatus>,
    /// 1부터 시작
    pub page: usize,
    /// 0이면 20
    pub page_size: usize,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(t) = self.doc_type {
            if doc.doc_type != t {
                return false;
            }
        }
        if let Some(ref cat) = self.category_id {
            if doc.category_id.as_deref() != Some(cat.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if doc.status != status {
                return false;
            }
        }
        if let Some(ref keyword) = self.keyword {
            let keyword = keyword.to_lowercase();
            if !doc.title.to_lowercase().contains(&keyword)
                && !doc.content.to_lowercase().contains(&keyword)
            {
                return false;
            }
        }
        true
    }

    pub fn page(&self) -> usize {
        self.page.max(1)
    }

    pub fn page_size(&self) -> usize {
        if self.page_size == 0 {
            20
        } else {
            self.page_size
        }
    }
}

/// 문서 목록 페이지
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPage {
    pub items: Vec<Document>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: "d1".to_string(),
            knowledge_base_id: "kb".to_string(),
            owner_id: "u".to_string(),
            doc_type: DocumentType::Note,
            title: title.to_string(),
            content: content.to_string(),
            category_id: Some("c1".to_string()),
            status: DocumentStatus::Indexed,
            chunk_count: 0,
            metadata: Metadata::new(),
            chunks: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!("Webpage".parse::<DocumentType>().unwrap(), DocumentType::Webpage);
        assert!("pdf".parse::<DocumentType>().is_err());
        assert_eq!(DocumentType::parse_lossy("pdf"), DocumentType::Document);
        assert_eq!(DocumentStatus::parse_lossy("INDEXED"), DocumentStatus::Indexed);
        assert_eq!(DocumentStatus::parse_lossy("???"), DocumentStatus::Pending);
    }

    #[test]
    fn test_filter_matches() {
        let d = doc("Sales Report", "quarterly revenue");

        let mut filter = DocumentFilter::default();
        assert!(filter.matches(&d));

        filter.keyword = Some("REVENUE".to_string());
        assert!(filter.matches(&d));

        filter.doc_type = Some(DocumentType::Webpage);
        assert!(!filter.matches(&d));

        let filter = DocumentFilter {
            category_id: Some("c2".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&d));
    }

    #[test]
    fn test_chunk_metadata_json() {
        let meta: ChunkMetadata = serde_json::from_str(r#"{"pageNumber":3}"#).unwrap();
        assert_eq!(meta.page_number, Some(3));
        assert!(meta.heading.is_none());

        let json = serde_json::to_string(&ChunkMetadata::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
