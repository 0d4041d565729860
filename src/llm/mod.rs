pub mod providers;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM provider types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LLMProvider {
    LMStudio,
    OpenAI,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            endpoint: None,
            api_key: None,
            model: "gpt-4-turbo-preview".to_string(),
            max_tokens: 4096,
            temperature: 0.5,
            timeout_seconds: 300,
        }
    }
}

impl LLMConfig {
    /// Chat completions endpoint for this provider
    pub fn resolved_endpoint(&self) -> String {
        match (&self.endpoint, &self.provider) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, LLMProvider::OpenAI) => "https://api.openai.com/v1/chat/completions".to_string(),
            (None, LLMProvider::LMStudio) => "http://localhost:1234/v1/chat/completions".to_string(),
        }
    }
}

/// Chat message for LLM communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Requested shape of the completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Trait for LLM providers
#[async_trait]
pub trait LLM: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>, format: ResponseFormat) -> Result<LLMResponse>;
    async fn is_available(&self) -> bool;
    fn provider_type(&self) -> LLMProvider;
}

/// Create LLM instance based on configuration
pub fn create_llm(config: &LLMConfig) -> Result<Box<dyn LLM>> {
    Ok(Box::new(providers::ChatCompletionsProvider::new(config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("a").role, "system");
        assert_eq!(ChatMessage::user("b").role, "user");
        assert_eq!(ChatMessage::user("b").content, "b");
    }

    #[test]
    fn test_resolved_endpoint() {
        let mut config = LLMConfig {
            provider: LLMProvider::OpenAI,
            endpoint: None,
            ..LLMConfig::default()
        };
        assert_eq!(
            config.resolved_endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );

        config.endpoint = Some("http://proxy/v1/chat/completions".to_string());
        assert_eq!(config.resolved_endpoint(), "http://proxy/v1/chat/completions");
    }
}
