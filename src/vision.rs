use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::config::VisionConfig;
use crate::llm::providers::post_chat_completion;

/// Image-understanding capability producing one free-text description
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(&self, images: &[PathBuf]) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// Read an image into a `data:` URL
pub async fn image_data_url(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mime = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };

    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

/// Scene description through an OpenAI-compatible vision model
pub struct OpenAIVisionDescriber {
    config: VisionConfig,
    client: reqwest::Client,
}

impl OpenAIVisionDescriber {
    pub fn new(config: VisionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    async fn build_request(&self, images: &[PathBuf]) -> anyhow::Result<VisionRequest> {
        let mut content = Vec::with_capacity(images.len() + 1);
        content.push(ContentPart::Text {
            text: self.config.prompt.clone(),
        });
        for image in images {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_data_url(image).await?,
                },
            });
        }

        Ok(VisionRequest {
            model: self.config.model.clone(),
            messages: vec![VisionMessage {
                role: "user",
                content,
            }],
            max_tokens: self.config.max_tokens,
        })
    }
}

#[async_trait]
impl ImageDescriber for OpenAIVisionDescriber {
    async fn describe(&self, images: &[PathBuf]) -> anyhow::Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;

        info!("👁️  Describing {} stable frames with {}", images.len(), self.config.model);

        let request = self.build_request(images).await?;
        let response =
            post_chat_completion(&self.client, &self.config.endpoint, Some(api_key), &request).await?;

        Ok(response.content)
    }
}
