//! Agentic Retriever - 파일시스템 기반 점진적 검색
//!
//! 벡터/그래프 인덱스와 독립적으로 디렉토리 트리를 직접 검색합니다.
//!
//! 1. 도메인 찾기: 하위 디렉토리 인덱스(`data_structure.md`)와 디렉토리 이름으로 선택
//! 2. 파일 찾기: `grep -r -l -i -F`로 키워드 포함 파일 검색 (실패 시 프로세스 내 탐색)
//! 3. 내용 찾기: 파일 유형별로 관련 문단 또는 전처리된 형제 파일 읽기
//! 4. 결과가 없으면 짧아진 키워드로 루트에서 재시도
//!
//! 어떤 경우에도 에러를 반환하지 않으며, 결과가 없으면 `success = false`입니다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use ignore::WalkBuilder;
use regex::Regex;
use serde::Serialize;

use super::chunker::extract_keywords;
use crate::config::AgenticConfig;

// ============================================================================
// Types
// ============================================================================

/// 검색된 소스
#[derive(Debug, Clone, Serialize)]
pub struct AgenticSource {
    pub file: PathBuf,
    pub content: String,
    pub relevance: f32,
}

/// 검색 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticResult {
    pub success: bool,
    pub sources: Vec<AgenticSource>,
    /// 사람이 읽을 수 있는 검색 과정 기록
    pub search_history: Vec<String>,
    pub retry_count: usize,
}

/// 디렉토리 인덱스 항목 (파일명 | 설명 | 키워드)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
}

/// 검색 도메인 (하위 디렉토리)
#[derive(Debug, Clone)]
struct Domain {
    path: PathBuf,
    name: String,
    files: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
struct FileHit {
    path: PathBuf,
    score: f32,
}

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n(?:[ \t]*\r?\n)*").expect("paragraph regex is valid"));

// ============================================================================
// AgenticRetriever
// ============================================================================

/// Agentic 검색기
#[derive(Debug, Clone)]
pub struct AgenticRetriever {
    config: AgenticConfig,
}

impl AgenticRetriever {
    pub fn new(config: AgenticConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// 점진적 검색
    pub async fn retrieve(&self, query: &str) -> AgenticResult {
        let mut history = Vec::new();
        let mut sources = Vec::new();

        let keywords = extract_keywords(query, self.config.max_keywords);
        history.push(format!("Extracted keywords: {}", keywords.join(", ")));

        let mut domains = self.locate_domains(&keywords).await;
        if domains.is_empty() {
            history.push("Located domains: (root)".to_string());
            domains.push(Domain {
                path: self.config.root.clone(),
                name: String::new(),
                files: Vec::new(),
            });
        } else {
            let names: Vec<&str> = domains.iter().map(|d| d.name.as_str()).collect();
            history.push(format!("Located domains: {}", names.join(", ")));
        }

        for domain in &domains {
            let hits = self.locate_files(domain, &keywords).await;
            history.push(format!(
                "Found {} relevant files in {}",
                hits.len(),
                domain.path.display()
            ));

            for hit in hits.iter().take(self.config.max_files_per_domain) {
                if let Some(content) = self.read_file_content(&hit.path, &keywords).await {
                    let content = truncate_chars(&content, self.config.max_source_chars);
                    history.push(format!(
                        "Read file: {} ({} chars)",
                        file_name(&hit.path),
                        content.chars().count()
                    ));
                    sources.push(AgenticSource {
                        file: hit.path.clone(),
                        content,
                        relevance: hit.score,
                    });
                }
            }
        }

        let mut retry_count = 0;
        while sources.is_empty() && retry_count < self.config.max_retries {
            retry_count += 1;
            let alternatives =
                alternative_keywords(&keywords, retry_count, self.config.retry_keywords);
            history.push(format!(
                "Retry {} with keywords: {}",
                retry_count,
                alternatives.join(", ")
            ));

            let hits = self.grep_search(&self.config.root, &alternatives).await;
            for hit in hits.iter().take(self.config.retry_file_cap) {
                if let Some(content) = self.read_file_content(&hit.path, &alternatives).await {
                    sources.push(AgenticSource {
                        file: hit.path.clone(),
                        content: truncate_chars(&content, self.config.max_source_chars),
                        relevance: hit.score * self.config.retry_decay,
                    });
                }
            }
        }

        tracing::debug!(
            "Agentic search for {:?}: {} sources after {} retries",
            query,
            sources.len(),
            retry_count
        );

        AgenticResult {
            success: !sources.is_empty(),
            sources,
            search_history: history,
            retry_count,
        }
    }

    // ========================================================================
    // Step 1: Domains
    // ========================================================================

    /// 키워드와 관련된 하위 디렉토리 (이름순)
    async fn locate_domains(&self, keywords: &[String]) -> Vec<Domain> {
        if keywords.is_empty() {
            return vec![];
        }

        let mut entries = match tokio::fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot read knowledge root {:?}: {}", self.config.root, e);
                return vec![];
            }
        };

        let mut dirs = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut domains = Vec::new();
        for dir in dirs {
            let name = file_name(&dir);
            let index = tokio::fs::read_to_string(dir.join(&self.config.index_file))
                .await
                .unwrap_or_default();

            let name_lower = name.to_lowercase();
            let index_lower = index.to_lowercase();
            let matched = keywords.iter().any(|k| {
                let k = k.to_lowercase();
                name_lower.contains(&k) || index_lower.contains(&k)
            });

            if matched {
                domains.push(Domain {
                    files: parse_directory_index(&index),
                    path: dir,
                    name,
                });
            }
        }

        domains
    }

    // ========================================================================
    // Step 2: Files
    // ========================================================================

    /// 도메인 내 후보 파일 (grep 결과 + 인덱스 키워드 매칭)
    async fn locate_files(&self, domain: &Domain, keywords: &[String]) -> Vec<FileHit> {
        let mut hits = self.grep_search(&domain.path, keywords).await;
        if keywords.is_empty() {
            return hits;
        }

        let total = keywords.len() as f32;
        for entry in &domain.files {
            let haystack = format!(
                "{} {} {}",
                entry.name,
                entry.description,
                entry.keywords.join(" ")
            )
            .to_lowercase();
            let matched = keywords
                .iter()
                .filter(|k| haystack.contains(&k.to_lowercase()))
                .count();
            if matched == 0 {
                continue;
            }

            let path = domain.path.join(&entry.name);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }

            let score = matched as f32 / total;
            match hits.iter_mut().find(|h| h.path == path) {
                Some(hit) => hit.score = hit.score.max(score),
                None => hits.push(FileHit { path, score }),
            }
        }

        sort_hits(&mut hits);
        hits
    }

    /// 키워드별 파일 검색 후 매칭 비율로 점수화
    async fn grep_search(&self, dir: &Path, keywords: &[String]) -> Vec<FileHit> {
        let mut matches: HashMap<PathBuf, usize> = HashMap::new();

        for keyword in keywords.iter().filter(|k| !k.is_empty()) {
            let files: HashSet<PathBuf> = self.files_containing(dir, keyword).await.into_iter().collect();
            for file in files {
                if file_name(&file) == self.config.index_file {
                    continue;
                }
                *matches.entry(file).or_default() += 1;
            }
        }

        let total = keywords.len().max(1) as f32;
        let mut hits: Vec<FileHit> = matches
            .into_iter()
            .map(|(path, count)| FileHit {
                path,
                score: count as f32 / total,
            })
            .collect();
        sort_hits(&mut hits);
        hits
    }

    async fn files_containing(&self, dir: &Path, keyword: &str) -> Vec<PathBuf> {
        if self.config.use_grep {
            match self.grep_files(dir, keyword).await {
                Ok(files) => return files,
                Err(e) => tracing::debug!("grep unavailable, walking {:?} instead: {}", dir, e),
            }
        }

        let dir = dir.to_path_buf();
        let keyword = keyword.to_string();
        let extensions = self.config.extensions.clone();
        tokio::task::spawn_blocking(move || walk_files(&dir, &keyword, &extensions))
            .await
            .unwrap_or_default()
    }

    /// 외부 grep 호출 (셸 없이 인자 전달)
    ///
    /// 종료 코드 1(매칭 없음)과 2(경로 없음 등)는 빈 결과로 처리합니다.
    async fn grep_files(&self, dir: &Path, keyword: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut cmd = tokio::process::Command::new("grep");
        cmd.args(["-r", "-l", "-i", "-F"]);
        for ext in &self.config.extensions {
            cmd.arg(format!("--include=*.{}", ext));
        }
        cmd.arg("--").arg(keyword).arg(dir);

        let output = cmd.output().await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    // ========================================================================
    // Step 3: Content
    // ========================================================================

    /// 파일 유형별 내용 읽기
    async fn read_file_content(&self, path: &Path, keywords: &[String]) -> Option<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            return self.read_text_file(path, keywords).await;
        }

        match ext.as_str() {
            "pdf" | "docx" | "doc" => {
                let sibling = path.with_extension("txt");
                if tokio::fs::try_exists(&sibling).await.unwrap_or(false) {
                    self.read_text_file(&sibling, keywords).await
                } else {
                    let label = if ext == "pdf" { "PDF" } else { "Word" };
                    Some(format!(
                        "[{} file: {}, requires preprocessing into text format]",
                        label,
                        file_name(path)
                    ))
                }
            }
            "xlsx" | "xls" => {
                let sibling = path.with_extension("json");
                if !tokio::fs::try_exists(&sibling).await.unwrap_or(false) {
                    return Some(format!(
                        "[Excel file: {}, requires preprocessing into JSON format]",
                        file_name(path)
                    ));
                }

                let raw = tokio::fs::read_to_string(&sibling).await.ok()?;
                match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(value) => {
                        let pretty = serde_json::to_string_pretty(&value).unwrap_or(raw);
                        Some(truncate_chars(&pretty, self.config.max_source_chars))
                    }
                    Err(e) => {
                        tracing::warn!("Malformed spreadsheet JSON {:?}: {}", sibling, e);
                        None
                    }
                }
            }
            _ => None,
        }
    }

    async fn read_text_file(&self, path: &Path, keywords: &[String]) -> Option<String> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                return None;
            }
        };

        let relevant = extract_relevant(&content, keywords, self.config.fallback_chars);
        if relevant.trim().is_empty() {
            None
        } else {
            Some(relevant)
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 디렉토리 인덱스 파싱 (Markdown 표: 파일명 | 설명 | 쉼표 구분 키워드)
///
/// 헤더 행(바로 다음 줄이 구분선인 행)과 구분선은 건너뜁니다.
pub fn parse_directory_index(content: &str) -> Vec<IndexEntry> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let is_separator = |line: &str| line.starts_with('|') && line.contains("---");

    let mut entries = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with('|') || is_separator(line) {
            continue;
        }
        if lines.get(i + 1).map(|next| is_separator(next)).unwrap_or(false) {
            continue;
        }

        let cells: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() < 2 {
            continue;
        }

        entries.push(IndexEntry {
            name: cells[0].to_string(),
            description: cells[1].to_string(),
            keywords: cells
                .get(2)
                .map(|k| {
                    k.split([',', '，'])
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }

    entries
}

/// 키워드를 포함한 문단과 앞뒤 한 문단씩
///
/// 매칭이 없으면 앞부분 `fallback_chars` 문자를 반환합니다.
pub fn extract_relevant(content: &str, keywords: &[String], fallback_chars: usize) -> String {
    let paragraphs: Vec<&str> = PARAGRAPH_RE.split(content).collect();
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut selected = BTreeSet::new();
    for (i, paragraph) in paragraphs.iter().enumerate() {
        let lower = paragraph.to_lowercase();
        if keywords.iter().any(|k| !k.is_empty() && lower.contains(k.as_str())) {
            if i > 0 {
                selected.insert(i - 1);
            }
            selected.insert(i);
            if i + 1 < paragraphs.len() {
                selected.insert(i + 1);
            }
        }
    }

    if selected.is_empty() {
        return truncate_chars(content, fallback_chars);
    }

    selected
        .into_iter()
        .map(|i| paragraphs[i])
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 재시도용 대체 키워드
///
/// 시도마다 키워드 앞부분을 원래 길이의 0.7^attempt 비율(올림, 최소 2자)로 줄이고
/// 원래 키워드도 함께 사용합니다. 중복 제거 후 최대 `cap`개.
pub fn alternative_keywords(keywords: &[String], attempt: usize, cap: usize) -> Vec<String> {
    let ratio = 0.7f32.powi(attempt.max(1) as i32);
    let mut seen = HashSet::new();
    let mut alternatives = Vec::new();

    for keyword in keywords {
        let len = keyword.chars().count();
        if len > 2 {
            let keep = ((len as f32 * ratio).ceil() as usize).max(2);
            alternatives.push(keyword.chars().take(keep).collect::<String>());
        }
        alternatives.push(keyword.clone());
    }

    alternatives
        .into_iter()
        .filter(|k| seen.insert(k.clone()))
        .take(cap)
        .collect()
}

/// 프로세스 내 파일 검색 (대소문자 무시)
fn walk_files(dir: &Path, keyword: &str, extensions: &[String]) -> Vec<PathBuf> {
    let keyword = keyword.to_lowercase();
    let mut files = Vec::new();
    if !dir.exists() {
        return files;
    }

    for entry in WalkBuilder::new(dir).standard_filters(false).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if !ext_ok || !path.is_file() {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            if content.to_lowercase().contains(&keyword) {
                files.push(path.to_path_buf());
            }
        }
    }

    files
}

/// 점수 내림차순, 동점은 경로순
fn sort_hits(hits: &mut [FileHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
