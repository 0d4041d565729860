use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::TranscriptionConfig;
use crate::error::{Capability, PipelineError, Result};
use crate::knowledge::TimedText;
use crate::media::MediaTranscoder;

/// One timed segment returned by speech-to-text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    #[serde(default)]
    pub id: u32,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    #[serde(default)]
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
}

impl TranscriptionResult {
    /// Transcript keyed by segment start second, in segment order
    pub fn to_timed_text(&self) -> TimedText {
        self.segments
            .iter()
            .map(|segment| (segment.start.to_string(), segment.text.clone()))
            .collect()
    }
}

/// Speech-to-text capability with segment-level timestamps
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> anyhow::Result<TranscriptionResult>;
}

/// OpenAI Whisper API transcription
pub struct WhisperApiTranscriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl WhisperApiTranscriber {
    pub fn new(config: TranscriptionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl SpeechToText for WhisperApiTranscriber {
    async fn transcribe(&self, audio: &Path) -> anyhow::Result<TranscriptionResult> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;

        info!("🤖 Transcribing with {}: {}", self.config.model, audio.display());

        let audio_data = tokio::fs::read(audio)
            .await
            .with_context(|| format!("Failed to read {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio_data)
                    .file_name(file_name)
                    .mime_str(audio_mime_type(audio))?,
            )
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Transcription API error {}: {}", status, error_text));
        }

        let result: TranscriptionResult = response.json().await?;
        info!(
            "✅ Transcription completed: {} segments, {} characters",
            result.segments.len(),
            result.text.len()
        );
        Ok(result)
    }
}

/// MIME type of an audio upload, from its file extension
fn audio_mime_type(audio: &Path) -> &'static str {
    let extension = audio
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Audio extraction followed by speech-to-text
pub struct TranscriptionPipeline {
    transcoder: Arc<dyn MediaTranscoder>,
    speech_to_text: Arc<dyn SpeechToText>,
    audio_file_name: String,
    transcoder_timeout: Duration,
    capability_timeout: Duration,
}

impl TranscriptionPipeline {
    pub fn new(
        transcoder: Arc<dyn MediaTranscoder>,
        speech_to_text: Arc<dyn SpeechToText>,
        audio_extension: &str,
        transcoder_timeout: Duration,
        capability_timeout: Duration,
    ) -> Self {
        Self {
            transcoder,
            speech_to_text,
            audio_file_name: format!("audio.{}", audio_extension),
            transcoder_timeout,
            capability_timeout,
        }
    }

    /// Transcribe `video`, writing the intermediate audio track into `scratch_dir`
    pub async fn run(&self, video: &Path, scratch_dir: &Path) -> Result<TimedText> {
        let start = Instant::now();
        let audio_path = scratch_dir.join(&self.audio_file_name);

        let audio = tokio::time::timeout(
            self.transcoder_timeout,
            self.transcoder.extract_audio(video, &audio_path),
        )
        .await
        .map_err(|_| {
            PipelineError::extraction(
                "audio",
                format!("transcoder timed out after {:?}", self.transcoder_timeout),
            )
        })?
        .map_err(|e| PipelineError::extraction("audio", format!("{:#}", e)))?;

        let result = tokio::time::timeout(self.capability_timeout, self.speech_to_text.transcribe(&audio))
            .await
            .map_err(|_| {
                PipelineError::capability(
                    Capability::SpeechToText,
                    anyhow!("timed out after {:?}", self.capability_timeout),
                )
            })?
            .map_err(|e| PipelineError::capability(Capability::SpeechToText, e))?;

        let transcript = result.to_timed_text();
        info!(
            "🗣️  Transcript ready: {} segments in {:.2}s",
            transcript.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_mime_type_follows_extension() {
        assert_eq!(audio_mime_type(Path::new("scratch/audio.mp3")), "audio/mpeg");
        assert_eq!(audio_mime_type(Path::new("scratch/audio.WAV")), "audio/wav");
        assert_eq!(audio_mime_type(Path::new("scratch/audio.flac")), "audio/flac");
        assert_eq!(audio_mime_type(Path::new("scratch/audio.m4a")), "audio/mp4");
        assert_eq!(audio_mime_type(Path::new("scratch/audio")), "application/octet-stream");
    }

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{
            "task": "transcribe",
            "language": "english",
            "duration": 8.47,
            "text": "Hello there. General Kenobi.",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 2.5, "text": " Hello there.", "tokens": [1, 2], "temperature": 0.0},
                {"id": 1, "seek": 0, "start": 2.5, "end": 4.0, "text": " General Kenobi."}
            ]
        }"#;

        let result: TranscriptionResult = serde_json::from_str(body).unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.language.as_deref(), Some("english"));

        let transcript = result.to_timed_text();
        let entries: Vec<_> = transcript.iter().collect();
        assert_eq!(entries, vec![("0", " Hello there."), ("2.5", " General Kenobi.")]);
    }

    #[test]
    fn test_duplicate_start_overwrites() {
        let result = TranscriptionResult {
            segments: vec![
                TranscriptionSegment { id: 0, start: 1.0, end: 2.0, text: "a".to_string() },
                TranscriptionSegment { id: 1, start: 1.0, end: 2.0, text: "b".to_string() },
            ],
            ..TranscriptionResult::default()
        };
        let transcript = result.to_timed_text();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.get("1"), Some("b"));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let transcriber = WhisperApiTranscriber::new(TranscriptionConfig::default()).unwrap();
        let err = transcriber.transcribe(Path::new("audio.mp3")).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
