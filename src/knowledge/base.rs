//! Knowledge Base - 소유자별 인메모리 문서 컬렉션
//!
//! 문서(청크 포함)와 카테고리를 삽입 순서대로 보관합니다.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::document::{
    Category, Chunk, ChunkSearchResult, Document, DocumentFilter, DocumentPage, DocumentStatus,
    DocumentType, NewCategory, NewDocument,
};

/// 지식 베이스 설정
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub enable_graph: bool,
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            enable_graph: true,
        }
    }
}

/// 문서 통계
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub documents: usize,
    pub chunks: usize,
    pub categories: usize,
    pub by_type: BTreeMap<String, usize>,
    pub total_content_bytes: usize,
}

/// 지식 베이스
#[derive(Debug)]
pub struct KnowledgeBase {
    id: String,
    owner_id: String,
    settings: KnowledgeBaseSettings,
    documents: HashMap<String, Document>,
    order: Vec<String>,
    categories: Vec<Category>,
}

impl KnowledgeBase {
    /// 소유자 ID에서 안정적인 지식 베이스 ID를 만들어 생성
    pub fn new(owner_id: impl Into<String>, settings: KnowledgeBaseSettings) -> Self {
        let owner_id = owner_id.into();
        Self {
            id: format!("kb-{}", owner_id),
            owner_id,
            settings,
            documents: HashMap::new(),
            order: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn settings(&self) -> &KnowledgeBaseSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// 새 문서 등록 (상태: pending)
    pub fn add_document(&mut self, new: NewDocument) -> Document {
        let now = Utc::now();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            knowledge_base_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            doc_type: new.doc_type,
            title: new.title,
            content: new.content,
            category_id: new.category_id,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            metadata: new.metadata,
            chunks: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.insert_document(doc.clone());
        doc
    }

    /// 기존 문서 삽입 (로드 시, 같은 ID면 교체)
    pub fn insert_document(&mut self, doc: Document) {
        let id = doc.id.clone();
        if self.documents.insert(id.clone(), doc).is_none() {
            self.order.push(id);
        }
    }

    /// 청크 결과 반영
    pub fn set_chunks(&mut self, document_id: &str, chunks: Vec<Chunk>, status: DocumentStatus) -> Option<&Document> {
        let doc = self.documents.get_mut(document_id)?;
        doc.chunk_count = chunks.len();
        doc.chunks = chunks;
        doc.status = status;
        doc.updated_at = Utc::now();
        Some(doc)
    }

    pub fn set_status(&mut self, document_id: &str, status: DocumentStatus) -> bool {
        match self.documents.get_mut(document_id) {
            Some(doc) => {
                doc.status = status;
                doc.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get_document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn delete_document(&mut self, id: &str) -> Option<Document> {
        let doc = self.documents.remove(id)?;
        self.order.retain(|d| d != id);
        Some(doc)
    }

    /// 삽입 순서대로 문서 순회
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.documents.get(id))
    }

    pub fn documents_by_type(&self, doc_type: DocumentType) -> Vec<&Document> {
        self.documents().filter(|d| d.doc_type == doc_type).collect()
    }

    /// 카테고리에 속한 문서 ID 집합
    pub fn document_ids_in_category(&self, category_id: &str) -> HashSet<String> {
        self.documents()
            .filter(|d| d.category_id.as_deref() == Some(category_id))
            .map(|d| d.id.clone())
            .collect()
    }

    /// 필터 + 페이지 (최신 문서 먼저)
    pub fn list(&self, filter: &DocumentFilter) -> DocumentPage {
        let matched: Vec<&Document> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.documents.get(id))
            .filter(|d| filter.matches(d))
            .collect();

        let page = filter.page();
        let page_size = filter.page_size();
        let items = matched
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .map(|d| (*d).clone())
            .collect();

        DocumentPage {
            items,
            total: matched.len(),
            page,
            page_size,
        }
    }

    /// 인메모리 청크 전문 검색 (모든 키워드 포함, 대소문자 무시)
    pub fn search_chunks(&self, query: &str, limit: usize) -> Vec<ChunkSearchResult> {
        let keywords: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if keywords.is_empty() {
            return vec![];
        }

        self.documents()
            .flat_map(|doc| doc.chunks.iter().map(move |chunk| (doc, chunk)))
            .filter(|(_, chunk)| {
                let content = chunk.content.to_lowercase();
                keywords.iter().all(|k| content.contains(k.as_str()))
            })
            .take(limit)
            .map(|(doc, chunk)| ChunkSearchResult {
                chunk_id: chunk.id.clone(),
                document_id: doc.id.clone(),
                document_title: doc.title.clone(),
                chunk_index: chunk.index,
                content: chunk.content.clone(),
                score: 1.0,
                metadata: chunk.metadata.clone(),
            })
            .collect()
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub fn add_category(&mut self, new: NewCategory) -> Category {
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            parent_id: new.parent_id,
            sort_order: new.sort_order,
            created_at: Utc::now(),
        };
        self.categories.push(category.clone());
        category
    }

    pub fn insert_category(&mut self, category: Category) {
        self.categories.retain(|c| c.id != category.id);
        self.categories.push(category);
    }

    pub fn get_category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// 정렬 순서 → 생성 순서
    pub fn categories(&self) -> Vec<Category> {
        let mut categories = self.categories.clone();
        categories.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        categories
    }

    /// 카테고리 삭제 (소속 문서와 하위 카테고리의 참조 해제)
    pub fn delete_category(&mut self, id: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|c| c.id != id);
        if self.categories.len() == before {
            return false;
        }

        for category in &mut self.categories {
            if category.parent_id.as_deref() == Some(id) {
                category.parent_id = None;
            }
        }
        for doc in self.documents.values_mut() {
            if doc.category_id.as_deref() == Some(id) {
                doc.category_id = None;
            }
        }
        true
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn stats(&self) -> DocumentStats {
        let mut by_type = BTreeMap::new();
        let mut chunks = 0;
        let mut bytes = 0;

        for doc in self.documents.values() {
            *by_type.entry(doc.doc_type.to_string()).or_insert(0) += 1;
            chunks += doc.chunks.len();
            bytes += doc.content.len();
        }

        DocumentStats {
            documents: self.documents.len(),
            chunks,
            categories: self.categories.len(),
            by_type,
            total_content_bytes: bytes,
        }
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.order.clear();
        self.categories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::ChunkMetadata;

    fn chunk(doc_id: &str, index: usize, content: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc_id, index),
            document_id: doc_id.to_string(),
            index,
            content: content.to_string(),
            start_offset: 0,
            end_offset: content.len(),
            embedding: None,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_add_and_set_chunks() {
        let mut kb = KnowledgeBase::new("alice", KnowledgeBaseSettings::default());
        assert_eq!(kb.id(), "kb-alice");

        let doc = kb.add_document(NewDocument::new("Guide", "hello world"));
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.owner_id, "alice");

        let chunks = vec![chunk(&doc.id, 0, "hello world")];
        let updated = kb.set_chunks(&doc.id, chunks, DocumentStatus::Indexed).unwrap();
        assert_eq!(updated.chunk_count, 1);
        assert_eq!(updated.status, DocumentStatus::Indexed);

        assert!(kb.set_chunks("missing", vec![], DocumentStatus::Failed).is_none());
    }

    #[test]
    fn test_list_with_filter_and_pages() {
        let mut kb = KnowledgeBase::new("alice", KnowledgeBaseSettings::default());
        for i in 0..5 {
            let doc_type = if i % 2 == 0 { DocumentType::Note } else { DocumentType::Webpage };
            kb.add_document(NewDocument::new(format!("Doc {}", i), "body").with_type(doc_type));
        }

        let page = kb.list(&DocumentFilter {
            doc_type: Some(DocumentType::Note),
            page_size: 2,
            ..Default::default()
        });
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title, "Doc 4");

        let page2 = kb.list(&DocumentFilter {
            doc_type: Some(DocumentType::Note),
            page: 2,
            page_size: 2,
            ..Default::default()
        });
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].title, "Doc 0");
    }

    #[test]
    fn test_search_chunks_in_memory() {
        let mut kb = KnowledgeBase::new("alice", KnowledgeBaseSettings::default());
        let doc = kb.add_document(NewDocument::new("Guide", "x"));
        kb.set_chunks(
            &doc.id,
            vec![chunk(&doc.id, 0, "Rust Async runtime"), chunk(&doc.id, 1, "rust borrow")],
            DocumentStatus::Indexed,
        );

        assert_eq!(kb.search_chunks("rust async", 10).len(), 1);
        assert_eq!(kb.search_chunks("RUST", 10).len(), 2);
        assert_eq!(kb.search_chunks("rust", 1).len(), 1);
        assert!(kb.search_chunks("", 10).is_empty());
    }

    #[test]
    fn test_categories_and_stats() {
        let mut kb = KnowledgeBase::new("alice", KnowledgeBaseSettings::default());
        let cat = kb.add_category(NewCategory::new("Finance"));
        let doc = kb.add_document(NewDocument::new("Report", "abc").with_category(&cat.id));

        assert_eq!(kb.document_ids_in_category(&cat.id).len(), 1);
        assert!(kb.delete_category(&cat.id));
        assert!(!kb.delete_category(&cat.id));
        assert!(kb.get_document(&doc.id).unwrap().category_id.is_none());

        let stats = kb.stats();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.categories, 0);
        assert_eq!(stats.by_type.get("document"), Some(&1));
        assert_eq!(stats.total_content_bytes, 3);
    }

    #[test]
    fn test_delete_document_keeps_order() {
        let mut kb = KnowledgeBase::new("alice", KnowledgeBaseSettings::default());
        let a = kb.add_document(NewDocument::new("a", ""));
        kb.add_document(NewDocument::new("b", ""));
        assert!(kb.delete_document(&a.id).is_some());
        assert!(kb.delete_document(&a.id).is_none());
        let titles: Vec<_> = kb.documents().map(|d| d.title.clone()).collect();
        assert_eq!(titles, vec!["b"]);
    }
}
