//! OpenAI 호환 HTTP 호출 공통 유틸리티
//!
//! 임베딩/생성 프로바이더가 공유하는 요청 헬퍼입니다.
//! 호출은 한 번만 수행하며, 실패는 호출자(폴백 체인)에게 그대로 넘깁니다.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// API가 성공이 아닌 상태 코드를 반환한 경우
///
/// `anyhow::Error::downcast_ref`로 상태 코드를 확인할 수 있습니다.
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiStatusError {
    pub status: u16,
    pub message: String,
}

impl ApiStatusError {
    /// 다른 모델/프로바이더로 전환할 가치가 있는 에러인지
    /// (인증 실패, 권한 없음, 요청 과다, 요청 과대, 서비스 불가)
    pub fn is_switchable(&self) -> bool {
        matches!(self.status, 401 | 403 | 413 | 429 | 503)
    }
}

/// OpenAI 호환 에러 응답
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// 공용 HTTP 클라이언트 생성
pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// `{base_url}/{path}` 결합
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// JSON POST 요청 (단일 시도)
///
/// 성공 시 응답 본문을 파싱하여 반환합니다. 실패는 재시도 없이 그대로 전달되며,
/// 비정상 상태 코드는 `ApiStatusError`로 감싸 폴백 체인이 판별할 수 있게 합니다.
pub async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let mut request = client.post(url).json(body);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;

    if status.is_success() {
        return serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse response from {}", url));
    }

    Err(status_error(status.as_u16(), text).into())
}

/// 에러 응답 본문에서 메시지를 꺼내 `ApiStatusError` 생성
fn status_error(status: u16, body: String) -> ApiStatusError {
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    ApiStatusError { status, message }
}
