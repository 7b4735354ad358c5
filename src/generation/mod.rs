//! 생성 모듈 - OpenAI 호환 Chat Completions
//!
//! 모델 이름 + 메시지 목록 + temperature를 받아 텍스트를 반환하는
//! 생성 프로바이더 인터페이스와 HTTP 구현체입니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::http::{build_client, endpoint, post_json};

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 생성 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 채팅 완성
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible Chat
// ============================================================================

/// OpenAI 호환 `/chat/completions` 구현체
#[derive(Debug)]
pub struct OpenAiChat {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: build_client()?,
        })
    }

    /// 환경변수 설정으로 생성
    pub fn from_env() -> Result<Self> {
        Self::new(ProviderConfig::chat_config_from_env())
    }

    /// 설정된 기본 모델 이름
    pub fn default_model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl GenerationProvider for OpenAiChat {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String> {
        let model = if model.is_empty() {
            self.config.model.as_str()
        } else {
            model
        };
        let url = endpoint(&self.config.base_url, "chat/completions");
        let body = ChatRequest {
            model,
            messages,
            temperature,
            stream: false,
        };

        let response: ChatResponse = post_json(&self.client, &url, &self.config.api_key, &body)
            .await
            .with_context(|| format!("Chat completion failed (model: {})", model))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = ChatMessage::system("be helpful");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be helpful");
    }

    #[test]
    fn test_response_without_content() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        assert!(text.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let config = ProviderConfig::new("http://127.0.0.1:9/v1", "", "test-model");
        let chat = OpenAiChat::new(config).unwrap();
        assert_eq!(chat.default_model(), "test-model");

        let body = ChatRequest {
            model: "m",
            messages: &[ChatMessage::user("hi")],
            temperature: 0.5,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }
}
