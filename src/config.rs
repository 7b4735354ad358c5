//! 설정 모듈
//!
//! 엔진/Agentic 검색/프로바이더 설정과 환경변수 로딩을 담당합니다.
//!
//! 환경변수:
//! - `PALANK_API_KEY` (또는 `OPENAI_API_KEY`): 프로바이더 API 키
//! - `PALANK_BASE_URL`: OpenAI 호환 엔드포인트
//! - `PALANK_CHAT_MODEL`, `PALANK_EMBED_MODELS` (쉼표 구분, 첫 번째가 기본)
//! - `PALANK_CHUNK_SIZE`, `PALANK_CHUNK_OVERLAP`, `PALANK_ORPHAN_POLICY`
//! - `PALANK_KNOWLEDGE_DIR`: Agentic 검색 루트 디렉토리

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-kb/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-kb")
}

// ============================================================================
// Engine Config
// ============================================================================

/// 문서 삭제 시 그 문서에서 추출된 그래프 엔티티/관계 처리 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// 그래프는 그대로 둠 (그래프 안정성 우선)
    #[default]
    Keep,
    /// 문서가 출처인 엔티티와 관계를 함께 제거
    Remove,
}

impl FromStr for OrphanPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keep" => Ok(OrphanPolicy::Keep),
            "remove" => Ok(OrphanPolicy::Remove),
            other => anyhow::bail!("Unknown orphan policy: {} (expected keep|remove)", other),
        }
    }
}

/// 검색 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
    /// 문서 추가 시 그래프 사실 추출 여부
    pub enable_graph: bool,
    /// 벡터 검색 최소 유사도
    pub vector_threshold: f32,
    /// 기본 검색 결과 수
    pub top_k: usize,
    /// 그래프 조회에 사용할 키워드 수
    pub graph_keywords: usize,
    /// 서브그래프 최대 엔티티 수
    pub graph_max_entities: usize,
    /// 답변 컨텍스트에 포함할 엔티티 수
    pub answer_entities: usize,
    /// 답변/문서 생성 temperature
    pub answer_temperature: f32,
    /// 엔티티 추출 temperature
    pub extraction_temperature: f32,
    /// 엔티티 추출 입력 최대 문자 수
    pub extraction_max_chars: usize,
    /// 생성 모델 이름
    pub chat_model: String,
    /// 그래프 고아 처리 정책
    pub orphan_policy: OrphanPolicy,
    /// Agentic 검색 설정
    pub agentic: AgenticConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            enable_graph: true,
            vector_threshold: 0.5,
            top_k: 5,
            graph_keywords: 5,
            graph_max_entities: 10,
            answer_entities: 5,
            answer_temperature: 0.7,
            extraction_temperature: 0.3,
            extraction_max_chars: 3000,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            orphan_policy: OrphanPolicy::Keep,
            agentic: AgenticConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 환경변수로 기본값 덮어쓰기
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(size) = env_parse::<usize>("PALANK_CHUNK_SIZE")? {
            config.chunk_size = size;
        }
        if let Some(overlap) = env_parse::<usize>("PALANK_CHUNK_OVERLAP")? {
            config.chunk_overlap = overlap;
        }
        if let Some(policy) = env_parse::<OrphanPolicy>("PALANK_ORPHAN_POLICY")? {
            config.orphan_policy = policy;
        }
        if let Some(model) = env_non_empty("PALANK_CHAT_MODEL") {
            config.chat_model = model;
        }
        if let Some(dir) = env_non_empty("PALANK_KNOWLEDGE_DIR") {
            config.agentic.root = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if !(0.0..=1.0).contains(&self.agentic.retry_decay) {
            anyhow::bail!("agentic.retry_decay must be within [0, 1]");
        }
        Ok(())
    }
}

// ============================================================================
// Agentic Config
// ============================================================================

/// Agentic 검색 설정
///
/// 재시도 횟수, 감쇠율, 파일 수 제한은 모두 정책 값이므로 설정으로 노출합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgenticConfig {
    /// 지식 파일 루트 디렉토리
    pub root: PathBuf,
    /// 디렉토리 인덱스 파일 이름
    pub index_file: String,
    /// 검색 대상 확장자
    pub extensions: Vec<String>,
    /// 쿼리에서 추출할 최대 키워드 수
    pub max_keywords: usize,
    /// 도메인당 읽을 최대 파일 수
    pub max_files_per_domain: usize,
    /// 최대 재시도 횟수
    pub max_retries: usize,
    /// 재시도당 읽을 최대 파일 수
    pub retry_file_cap: usize,
    /// 재시도 결과 관련도 감쇠율
    pub retry_decay: f32,
    /// 재시도 키워드 최대 개수
    pub retry_keywords: usize,
    /// 소스당 최대 문자 수
    pub max_source_chars: usize,
    /// 키워드 미매칭 시 앞부분 문자 수
    pub fallback_chars: usize,
    /// 외부 grep 사용 여부 (false면 프로세스 내 검색)
    pub use_grep: bool,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("knowledge"),
            index_file: "data_structure.md".to_string(),
            extensions: vec!["md".to_string(), "txt".to_string(), "json".to_string()],
            max_keywords: 5,
            max_files_per_domain: 5,
            max_retries: 3,
            retry_file_cap: 3,
            retry_decay: 0.8,
            retry_keywords: 3,
            max_source_chars: 2000,
            fallback_chars: 1000,
            use_grep: true,
        }
    }
}

impl AgenticConfig {
    /// 루트 디렉토리 지정 생성
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Provider Config
// ============================================================================

/// 기본 OpenAI 호환 엔드포인트
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// 기본 생성 모델
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
/// 기본 임베딩 모델
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// OpenAI 호환 프로바이더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// 빈 문자열이면 인증 헤더를 보내지 않음 (로컬 서버)
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// 임베딩 차원 (생성 모델에서는 무시)
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension: None,
        }
    }

    /// 임베딩 차원 (명시값 > 모델 테이블 > 1536)
    pub fn embedding_dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| model_dimension(&self.model))
    }

    /// 환경변수에서 임베딩 설정 목록 생성 (첫 번째가 기본)
    pub fn embedding_configs_from_env() -> Vec<ProviderConfig> {
        let base_url = env_non_empty("PALANK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = get_api_key().unwrap_or_default();
        let models = env_non_empty("PALANK_EMBED_MODELS")
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());

        models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|m| ProviderConfig::new(base_url.clone(), api_key.clone(), m))
            .collect()
    }

    /// 환경변수에서 생성 모델 설정 생성
    pub fn chat_config_from_env() -> ProviderConfig {
        let base_url = env_non_empty("PALANK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = env_non_empty("PALANK_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        ProviderConfig::new(base_url, get_api_key().unwrap_or_default(), model)
    }
}

/// 알려진 임베딩 모델의 차원
pub fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" | "text-embedding-v2" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-v1" | "BAAI/bge-large-zh-v1.5" | "BAAI/bge-m3" => 1024,
        "nomic-embed-text" => 768,
        _ => 1536,
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `PALANK_API_KEY` 환경변수
/// 2. `OPENAI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in ["PALANK_API_KEY", "OPENAI_API_KEY"] {
        if let Some(key) = env_non_empty(var) {
            tracing::debug!("Using API key from {}", var);
            return Ok(key);
        }
    }

    anyhow::bail!("API key not found. Set PALANK_API_KEY or OPENAI_API_KEY environment variable.")
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_non_empty(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", var, raw, e)),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert!(config.enable_graph);
        assert_eq!(config.orphan_policy, OrphanPolicy::Keep);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agentic_defaults() {
        let config = AgenticConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_file_cap, 3);
        assert!((config.retry_decay - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.index_file, "data_structure.md");
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let config = EngineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_orphan_policy_parse() {
        assert_eq!("keep".parse::<OrphanPolicy>().unwrap(), OrphanPolicy::Keep);
        assert_eq!(" Remove ".parse::<OrphanPolicy>().unwrap(), OrphanPolicy::Remove);
        assert!("drop".parse::<OrphanPolicy>().is_err());
    }

    #[test]
    fn test_model_dimension() {
        assert_eq!(model_dimension("text-embedding-3-large"), 3072);
        assert_eq!(model_dimension("text-embedding-v1"), 1024);
        assert_eq!(model_dimension("unknown-model"), 1536);

        let mut config = ProviderConfig::new(DEFAULT_BASE_URL, "", "text-embedding-v1");
        assert_eq!(config.embedding_dimension(), 1024);
        config.dimension = Some(256);
        assert_eq!(config.embedding_dimension(), 256);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"chunk_size": 800, "orphan_policy": "remove"}"#).unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.orphan_policy, OrphanPolicy::Remove);
    }
}
