//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더입니다.
//! 여러 모델 설정을 받으면 첫 번째를 기본으로 쓰고,
//! 인증/요청 과다/서비스 불가 에러 시 다음 모델로 전환합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder()?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{has_api_key, ProviderConfig};
use crate::http::{build_client, endpoint, post_json, ApiStatusError};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible Embedding
// ============================================================================

/// 한 번의 API 호출에 넣을 최대 텍스트 수
const BATCH_SIZE: usize = 10;

/// OpenAI 호환 `/embeddings` 엔드포인트 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    config: ProviderConfig,
    client: reqwest::Client,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let dimension = config.embedding_dimension();
        Ok(Self {
            config,
            client: build_client()?,
            dimension,
        })
    }

    /// 빈 텍스트를 제외하고 한 배치 요청
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = endpoint(&self.config.base_url, "embeddings");
        let body = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let response: EmbedResponse = post_json(&self.client, &url, &self.config.api_key, &body)
            .await
            .with_context(|| format!("Embedding request failed (model: {})", self.config.model))?;

        let mut data = response.data;
        if data.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, received {}",
                texts.len(),
                data.len()
            );
        }
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];

        // 빈 텍스트는 API로 보내지 않고 영벡터로 채움
        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                if t.trim().is_empty() {
                    None
                } else {
                    Some(i)
                }
            })
            .collect();
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                results[i] = vec![0.0; self.dimension];
            }
        }

        for (batch_no, batch) in pending.chunks(BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                batch_no + 1,
                pending.len().div_ceil(BATCH_SIZE)
            );
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.request(&inputs).await?;
            for (&i, vector) in batch.iter().zip(vectors) {
                results[i] = vector;
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// 여러 임베딩 프로바이더를 순서대로 시도하는 체인
///
/// 현재 프로바이더가 전환 가능한 에러(401/403/413/429/503)를 반환하면
/// 다음 프로바이더로 넘어가고, 이후 호출도 그 프로바이더에서 시작합니다.
/// 모든 프로바이더가 실패하면 마지막 에러를 반환합니다.
pub struct FallbackEmbedding {
    providers: Vec<Box<dyn EmbeddingProvider>>,
    current: AtomicUsize,
}

impl FallbackEmbedding {
    pub fn new(providers: Vec<Box<dyn EmbeddingProvider>>) -> Result<Self> {
        if providers.is_empty() {
            anyhow::bail!("At least one embedding provider is required");
        }
        Ok(Self {
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// 설정 목록으로 생성 (첫 번째가 기본)
    pub fn from_configs(configs: Vec<ProviderConfig>) -> Result<Self> {
        let providers = configs
            .into_iter()
            .map(|c| OpenAiEmbedding::new(c).map(|p| Box::new(p) as Box<dyn EmbeddingProvider>))
            .collect::<Result<Vec<_>>>()?;
        Self::new(providers)
    }

    fn active(&self) -> usize {
        self.current.load(Ordering::Relaxed) % self.providers.len()
    }

    /// 에러가 전환 대상이면 다음 프로바이더로 이동
    fn should_switch(&self, err: &anyhow::Error) -> bool {
        if self.providers.len() <= 1 {
            return false;
        }
        err.chain()
            .find_map(|e| e.downcast_ref::<ApiStatusError>())
            .map(ApiStatusError::is_switchable)
            .unwrap_or(false)
    }

    fn switch_from(&self, index: usize) {
        let next = (index + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        tracing::warn!(
            "Switching embedding provider: {} -> {}",
            self.providers[index].name(),
            self.providers[next].name()
        );
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_error = None;
        for _ in 0..self.providers.len() {
            let index = self.active();
            match self.providers[index].embed(text).await {
                Ok(v) => return Ok(v),
                Err(e) if self.should_switch(&e) => {
                    tracing::warn!("Embedding failed on {}: {:#}", self.providers[index].name(), e);
                    self.switch_from(index);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No embedding provider available")))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;
        for _ in 0..self.providers.len() {
            let index = self.active();
            match self.providers[index].embed_batch(texts).await {
                Ok(v) => return Ok(v),
                Err(e) if self.should_switch(&e) => {
                    tracing::warn!(
                        "Batch embedding failed on {}: {:#}",
                        self.providers[index].name(),
                        e
                    );
                    self.switch_from(index);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No embedding provider available")))
    }

    fn dimension(&self) -> usize {
        self.providers[self.active()].dimension()
    }

    fn name(&self) -> &str {
        self.providers[self.active()].name()
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성 (환경변수 설정)
pub fn create_embedder() -> Result<FallbackEmbedding> {
    if !has_api_key() {
        tracing::warn!("No API key set; embedding requests are sent without authentication");
    }

    let configs = ProviderConfig::embedding_configs_from_env();
    let embedder = FallbackEmbedding::from_configs(configs)?;
    tracing::info!(
        "Using embedding model {} (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
