//! 에러 타입
//!
//! 검색 엔진 전체에서 사용하는 에러 분류입니다.
//! - Provider: 임베딩/생성 API 호출 실패 (호출자에게 전파)
//! - MissingEntity: 존재하지 않는 엔티티를 참조하는 관계 생성
//! - NotFound: 문서/청크 부재 (읽기 경로에서는 None으로 반환)
//! - Parse: 저장된 JSON 또는 모델 출력 파싱 실패 (대부분 로컬에서 복구)

use thiserror::Error;

/// 검색 엔진 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 임베딩 또는 생성 프로바이더 호출 실패
    #[error("Provider error: {0:#}")]
    Provider(#[source] anyhow::Error),

    /// 관계의 소스/타겟 엔티티가 존재하지 않음
    #[error("Missing entity: {0}")]
    MissingEntity(String),

    /// 문서/청크/카테고리 없음
    #[error("Not found: {0}")]
    NotFound(String),

    /// 신뢰할 수 없는 문자열 파싱 실패
    #[error("Parse failure: {0}")]
    Parse(String),

    /// 영구 저장소 에러
    #[error("Storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// 잘못된 설정
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    pub fn provider(err: anyhow::Error) -> Self {
        RagError::Provider(err)
    }

    pub fn storage(err: anyhow::Error) -> Self {
        RagError::Storage(err)
    }

    pub fn not_found<T: Into<String>>(what: T) -> Self {
        RagError::NotFound(what.into())
    }
}

/// 엔진 결과 타입
pub type Result<T> = std::result::Result<T, RagError>;
