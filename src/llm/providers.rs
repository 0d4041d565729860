use super::{ChatMessage, LLMConfig, LLMProvider, LLMResponse, ResponseFormat, LLM};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Provider for any OpenAI-compatible chat completions endpoint (OpenAI, LMStudio)
pub struct ChatCompletionsProvider {
    config: LLMConfig,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatField>,
}

#[derive(Debug, Serialize)]
struct ResponseFormatField {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl ChatCompletionsProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.provider == LLMProvider::OpenAI && config.api_key.is_none() {
            return Err(anyhow!("OpenAI API key required"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let endpoint = config.resolved_endpoint();

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }
}

/// POST a chat completions request body and return the first choice
pub(crate) async fn post_chat_completion<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: Option<&str>,
    body: &B,
) -> Result<LLMResponse> {
    let mut request = client.post(endpoint).json(body);
    if let Some(api_key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", api_key));
    }

    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(anyhow!("Chat completions API error {}: {}", status, text));
    }

    let chat_response: ChatResponse = response.json().await?;

    let content = chat_response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("No response content from {}", endpoint))?;

    Ok(LLMResponse {
        content,
        tokens_used: chat_response.usage.map(|u| u.total_tokens),
    })
}

#[async_trait]
impl LLM for ChatCompletionsProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, format: ResponseFormat) -> Result<LLMResponse> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: match format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(ResponseFormatField { kind: "json_object" }),
            },
        };

        debug!("Sending chat request to {} ({:?})", self.endpoint, self.config.provider);

        post_chat_completion(
            &self.client,
            &self.endpoint,
            self.config.api_key.as_deref(),
            &request,
        )
        .await
    }

    async fn is_available(&self) -> bool {
        let models_endpoint = self.endpoint.replace("/chat/completions", "/models");

        let mut request = self.client.get(&models_endpoint);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        self.config.provider.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_api_key() {
        let config = LLMConfig {
            provider: LLMProvider::OpenAI,
            api_key: None,
            ..LLMConfig::default()
        };
        assert!(ChatCompletionsProvider::new(config).is_err());
    }

    #[test]
    fn test_lmstudio_without_key() {
        let config = LLMConfig {
            provider: LLMProvider::LMStudio,
            model: "local-model".to_string(),
            ..LLMConfig::default()
        };
        let provider = ChatCompletionsProvider::new(config).unwrap();
        assert_eq!(provider.endpoint, "http://localhost:1234/v1/chat/completions");
        assert_eq!(provider.provider_type(), LLMProvider::LMStudio);
    }

    #[test]
    fn test_json_object_request_shape() {
        let request = ChatRequest {
            model: "gpt-4-turbo-preview".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
            temperature: 0.5,
            response_format: Some(ResponseFormatField { kind: "json_object" }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");

        let plain = ChatRequest {
            response_format: None,
            ..request
        };
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("response_format").is_none());
    }
}
