//! Vector Store - 인메모리 코사인 유사도 검색
//!
//! 청크 임베딩을 삽입 순서대로 보관하고 선형 스캔으로 Top-K를 찾습니다.
//! 서로 다른 차원의 벡터가 공존할 수 있으며, 검색은 쿼리와 같은 차원만 비교합니다.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEntry {
    /// 청크 ID
    pub chunk_id: String,
    /// 문서 ID
    pub document_id: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: usize,
    /// 청크 텍스트
    pub content: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// 코사인 유사도
    pub similarity: f32,
}

/// 저장소 통계
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStats {
    pub total_vectors: usize,
    pub documents: usize,
    pub dimensions: Vec<usize>,
}

/// 내보내기 스냅샷 (삽입 순서 유지)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub entries: Vec<VectorEntry>,
}

// ============================================================================
// VectorStore
// ============================================================================

/// 인메모리 벡터 저장소
///
/// 엔트리는 삽입 일련번호 순으로 정렬되어 있어 동점 결과의 순서가 안정적입니다.
#[derive(Debug, Default)]
pub struct VectorStore {
    entries: BTreeMap<u64, VectorEntry>,
    by_chunk: HashMap<String, u64>,
    next_seq: u64,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 벡터 추가 (같은 청크 ID는 위치를 유지한 채 교체)
    pub fn add_vector(&mut self, entry: VectorEntry) {
        if let Some(&seq) = self.by_chunk.get(&entry.chunk_id) {
            self.entries.insert(seq, entry);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_chunk.insert(entry.chunk_id.clone(), seq);
        self.entries.insert(seq, entry);
    }

    /// 청크 벡터 삭제
    pub fn delete_vector(&mut self, chunk_id: &str) -> bool {
        match self.by_chunk.remove(chunk_id) {
            Some(seq) => self.entries.remove(&seq).is_some(),
            None => false,
        }
    }

    /// 문서의 모든 벡터 삭제
    pub fn delete_document_vectors(&mut self, document_id: &str) -> usize {
        let seqs: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.document_id == document_id)
            .map(|(&seq, _)| seq)
            .collect();

        for seq in &seqs {
            if let Some(entry) = self.entries.remove(seq) {
                self.by_chunk.remove(&entry.chunk_id);
            }
        }

        seqs.len()
    }

    /// Top-K 검색
    ///
    /// 쿼리와 차원이 다른 엔트리는 건너뛰고, `threshold` 이상만 유사도 내림차순으로 반환합니다.
    pub fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchResult> {
        self.search_where(query, top_k, threshold, |_| true)
    }

    /// 특정 문서 안에서 검색
    pub fn search_by_document(
        &self,
        query: &[f32],
        document_id: &str,
        top_k: usize,
        threshold: f32,
    ) -> Vec<SearchResult> {
        self.search_where(query, top_k, threshold, |e| e.document_id == document_id)
    }

    fn search_where<F>(&self, query: &[f32], top_k: usize, threshold: f32, keep: F) -> Vec<SearchResult>
    where
        F: Fn(&VectorEntry) -> bool,
    {
        if query.is_empty() || top_k == 0 {
            return vec![];
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .values()
            .filter(|e| e.embedding.len() == query.len() && keep(e))
            .filter_map(|e| {
                let similarity = cosine_similarity(query, &e.embedding);
                (similarity >= threshold).then(|| SearchResult {
                    chunk_id: e.chunk_id.clone(),
                    document_id: e.document_id.clone(),
                    chunk_index: e.chunk_index,
                    content: e.content.clone(),
                    similarity,
                })
            })
            .collect();

        // sort_by는 안정 정렬: 동점은 삽입 순서 유지
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(top_k);
        results
    }

    /// 저장된 벡터 차원 목록 (오름차순)
    pub fn dimensions(&self) -> Vec<usize> {
        self.entries
            .values()
            .map(|e| e.embedding.len())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn count_by_dimension(&self, dimension: usize) -> usize {
        self.entries
            .values()
            .filter(|e| e.embedding.len() == dimension)
            .count()
    }

    pub fn count_for_document(&self, document_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.document_id == document_id)
            .count()
    }

    pub fn stats(&self) -> VectorStats {
        let documents: BTreeSet<&str> = self
            .entries
            .values()
            .map(|e| e.document_id.as_str())
            .collect();

        VectorStats {
            total_vectors: self.entries.len(),
            documents: documents.len(),
            dimensions: self.dimensions(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_chunk.clear();
        self.next_seq = 0;
    }

    pub fn export(&self) -> VectorSnapshot {
        VectorSnapshot {
            entries: self.entries.values().cloned().collect(),
        }
    }

    /// 스냅샷 가져오기 (기존 내용 대체)
    pub fn import(&mut self, snapshot: VectorSnapshot) {
        self.clear();
        for entry in snapshot.entries {
            self.add_vector(entry);
        }

        let dims = self.dimensions();
        if dims.len() > 1 {
            tracing::warn!("Vector store holds multiple dimensions: {:?}", dims);
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
