//! Document Processor - 텍스트 청킹 및 키워드 추출
//!
//! 원문을 오버랩이 있는 청크로 나누고, 각 청크의 원문 오프셋을 기록합니다.
//! - 청크 오프셋은 UTF-8 바이트 오프셋이며 항상 문자 경계에 위치
//! - 청크들은 `[0, len)` 전체를 빈틈없이 덮음
//! - 청크 끝은 문단 > 줄 > 문장 > 공백 경계 순으로 조정
//! - 각 청크에 가장 가까운 Markdown 헤더를 메타데이터로 기록

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use super::document::{Chunk, ChunkMetadata};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 청크 크기 (바이트 기준 최대 길이)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 크기
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }
}

/// 원문 내 청크 구간
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    /// 청크가 속한 Markdown 헤더
    pub heading: Option<String>,
}

// ============================================================================
// DocumentProcessor
// ============================================================================

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$").expect("heading regex is valid")
});

/// 문서 처리기
///
/// 청킹 설정을 보관하며 문서 본문을 [`Chunk`] 목록으로 변환합니다.
#[derive(Debug, Clone, Default)]
pub struct DocumentProcessor {
    config: ChunkConfig,
}

impl DocumentProcessor {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 텍스트를 구간으로 분할
    pub fn chunk(&self, text: &str) -> Vec<TextSpan> {
        let len = text.len();
        if len == 0 {
            return vec![];
        }

        let size = self.config.chunk_size.max(1);
        let overlap = self.config.overlap.min(size.saturating_sub(1));
        let headings = find_headings(text);

        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = floor_char_boundary(text, (start + size).min(len));
            let mut end = if hard_end >= len {
                len
            } else {
                find_break(text, start, hard_end)
            };

            // 한 문자가 청크 크기보다 큰 경우에도 진행 보장
            if end <= start {
                end = ceil_char_boundary(text, start + 1);
            }

            spans.push(TextSpan {
                start,
                end,
                heading: heading_for(&headings, start, end),
            });

            if end >= len {
                break;
            }

            let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
            if overlap > 0 && next > start {
                // 오버랩을 단어 경계에서 시작
                if let Some(pos) = text[next..end].find(char::is_whitespace) {
                    let candidate = ceil_char_boundary(text, next + pos + 1);
                    if candidate < end {
                        next = candidate;
                    }
                }
            }
            if next <= start {
                next = end;
            }
            start = next;
        }

        spans
    }

    /// 문서 본문을 청크로 변환
    pub fn create_chunks(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        self.chunk(text)
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                index,
                content: text[span.start..span.end].to_string(),
                start_offset: span.start,
                end_offset: span.end,
                embedding: None,
                metadata: ChunkMetadata {
                    heading: span.heading,
                    ..Default::default()
                },
            })
            .collect()
    }
}

// ============================================================================
// Keyword Extraction
// ============================================================================

/// 불용어 목록 (영어 기능어 + 중국어 조사/의문사)
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being",
    "of", "to", "in", "on", "at", "for", "with", "by", "from", "as", "into", "about", "than",
    "this", "that", "these", "those", "it", "its", "do", "does", "did", "can", "could",
    "should", "would", "will", "shall", "may", "might", "must", "have", "has", "had", "not",
    "no", "so", "if", "then", "there", "their", "they", "them", "we", "you", "your", "our",
    "what", "which", "who", "whom", "how", "why", "when", "where", "me", "my", "i", "he",
    "she", "his", "her", "please", "tell", "show", "give", "some", "any", "all",
    "的", "是", "在", "有", "和", "与", "或", "了", "吗", "呢", "啊", "什么", "怎么", "如何",
    "为什么", "哪些", "哪个", "请问", "一下",
];

/// 키워드 추출
///
/// 토큰화 → 소문자화 → 불용어/한 글자/숫자 전용 토큰 제거 → 중복 제거 →
/// 최대 `n`개. 순서는 최초 등장 순서입니다.
pub fn extract_keywords(text: &str, n: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for token in text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')) {
        if keywords.len() >= n {
            break;
        }

        let token = token.trim_matches('-').to_lowercase();
        if token.chars().count() < 2 || !token.chars().any(char::is_alphabetic) {
            continue;
        }
        if STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }

    keywords
}

// ============================================================================
// Helper Functions
// ============================================================================

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// UTF-8 경계 조정 (인덱스 이상으로)
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i < s.len() && !s.is_char_boundary(i) {
            i += 1;
        }
        i
    }
}

/// 청크 끝 위치 결정
///
/// 윈도우 뒤쪽 절반에서 문단 > 줄 > 문장 > 공백 경계를 찾고,
/// 없으면 `hard_end`에서 자릅니다.
fn find_break(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];
    let min_pos = window.len() / 2;

    let candidates = [
        window.rfind("\n\n").map(|p| p + 2),
        window.rfind('\n').map(|p| p + 1),
        window
            .char_indices()
            .rev()
            .find(|(_, c)| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
            .map(|(p, c)| p + c.len_utf8()),
        window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(p, c)| p + c.len_utf8()),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|&pos| pos > min_pos)
        .map(|pos| start + pos)
        .unwrap_or(hard_end)
}

/// 헤더 위치 목록
fn find_headings(text: &str) -> Vec<(usize, String)> {
    HEADING_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let title = cap.get(1)?.as_str().trim();
            if title.is_empty() {
                None
            } else {
                Some((whole.start(), title.to_string()))
            }
        })
        .collect()
}

/// 청크 시작 이전의 마지막 헤더, 없으면 청크 내부 첫 헤더
fn heading_for(headings: &[(usize, String)], start: usize, end: usize) -> Option<String> {
    headings
        .iter()
        .rev()
        .find(|(pos, _)| *pos <= start)
        .or_else(|| headings.iter().find(|(pos, _)| *pos < end))
        .map(|(_, title)| title.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_coverage(text: &str, spans: &[TextSpan]) {
        assert!(!spans.is_empty());
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap between chunks");
            assert!(pair[1].start > pair[0].start, "offsets must increase");
            assert!(pair[1].end > pair[0].end, "offsets must increase");
        }
        for span in spans {
            assert!(span.end > span.start, "empty chunk");
            assert!(text.is_char_boundary(span.start));
            assert!(text.is_char_boundary(span.end));
        }
    }

    #[test]
    fn test_chunk_empty() {
        let processor = DocumentProcessor::default();
        assert!(processor.chunk("").is_empty());
    }

    #[test]
    fn test_chunk_small_text() {
        let processor = DocumentProcessor::default();
        let spans = processor.chunk("Short paragraph.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 16);
    }

    #[test]
    fn test_chunk_coverage_and_overlap() {
        let text = (0..60)
            .map(|i| format!("Sentence number {} talks about retrieval.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let processor = DocumentProcessor::new(ChunkConfig::new(120, 30));
        let spans = processor.chunk(&text);

        assert!(spans.len() > 1);
        assert_coverage(&text, &spans);

        // 인접 청크는 실제로 겹침
        let overlapping = spans
            .windows(2)
            .filter(|pair| pair[1].start < pair[0].end)
            .count();
        assert!(overlapping > 0);
        for span in &spans {
            assert!(span.end - span.start <= 120);
        }
    }

    #[test]
    fn test_chunk_coverage_without_overlap() {
        let text = "a b c d e f g h i j k l m n o p q r s t u v w x y z ".repeat(10);
        let processor = DocumentProcessor::new(ChunkConfig::new(40, 0));
        let spans = processor.chunk(&text);
        assert_coverage(&text, &spans);
        for pair in spans.windows(2) {
            assert_eq!(pair[1].start, pair[0].end);
        }
    }

    #[test]
    fn test_chunk_multibyte_text() {
        let text = "知识图谱是一种结构化的语义知识库。".repeat(20);
        let processor = DocumentProcessor::new(ChunkConfig::new(50, 10));
        let spans = processor.chunk(&text);
        assert_coverage(&text, &spans);
    }

    #[test]
    fn test_chunk_tiny_size_makes_progress() {
        let text = "세계세계";
        let processor = DocumentProcessor::new(ChunkConfig::new(1, 0));
        let spans = processor.chunk(text);
        assert_eq!(spans.len(), 4);
        assert_coverage(text, &spans);
    }

    #[test]
    fn test_chunk_prefers_paragraph_break() {
        let first = "First paragraph has some words in it.";
        let second = "Second paragraph continues the text further on.";
        let text = format!("{}\n\n{}", first, second);
        let processor = DocumentProcessor::new(ChunkConfig::new(60, 0));
        let spans = processor.chunk(&text);
        assert_eq!(&text[spans[0].start..spans[0].end], format!("{}\n\n", first));
    }

    #[test]
    fn test_create_chunks_records_heading() {
        let text = "# Intro\n\nSome intro text here.\n\n## Details\n\nDetailed body text that goes on.";
        let processor = DocumentProcessor::new(ChunkConfig::new(40, 0));
        let chunks = processor.create_chunks(text, "doc-1");

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].metadata.heading.as_deref(), Some("Intro"));
        assert_eq!(chunks.last().unwrap().metadata.heading.as_deref(), Some("Details"));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.document_id, "doc-1");
            assert_eq!(chunk.content, &text[chunk.start_offset..chunk.end_offset]);
        }
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("What is the revenue of the Orders table, orders by region?", 10);
        assert_eq!(keywords, vec!["revenue", "orders", "table", "region"]);
    }

    #[test]
    fn test_extract_keywords_cap_and_stopwords() {
        let keywords = extract_keywords("alpha beta gamma delta epsilon zeta", 3);
        assert_eq!(keywords, vec!["alpha", "beta", "gamma"]);

        let keywords = extract_keywords("什么 是 知识图谱", 5);
        assert_eq!(keywords, vec!["知识图谱"]);

        let keywords = extract_keywords("a 1 22 x9", 5);
        assert_eq!(keywords, vec!["x9"]);
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "Hello, 세계!";
        assert_eq!(floor_char_boundary(s, 5), 5);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(floor_char_boundary(s, 8), 7);
        assert_eq!(floor_char_boundary("", 0), 0);
        assert_eq!(ceil_char_boundary(s, 8), 10);
    }
}
