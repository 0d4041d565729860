use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Capability, PipelineError, Result};
use crate::knowledge::TimedText;
use crate::llm::{ChatMessage, ResponseFormat, LLM};
use crate::ocr::OcrFragment;

const SYSTEM_PROMPT: &str = "You are a helpful assistant tasked with cleaning up the results of an OCR (Optical Character Recognition) operation.";

const INSTRUCTIONS: &str = "Below is the output of an OCR operation on a set of images. \
It contains the \"Location\" in seconds, followed by a \"-\", followed by the extracted text. \
Please clean up the results keeping the Location and the \"-\". \
Expected output: 'Location 60s - [Cleaned up text goes here]'. Discard all duplicates.";

const RESPONSE_SHAPE: &str = "Return your response as a JSON object like this: \
{ \"2\" : \"Segment1\", \"8\" : \"Segment2\" }, where the keys are the \"Location\" \
and the values are the cleaned up text segments. Please remove all duplicated segments.";

/// Render fragments as `Location: <seconds>s - <text>` lines in frame order.
///
/// Fragments with no text are left out; returns `None` when nothing remains.
pub fn build_ocr_block(fragments: &[OcrFragment]) -> Option<String> {
    let mut ordered: Vec<&OcrFragment> = fragments.iter().collect();
    ordered.sort_by_key(|fragment| fragment.frame_index);

    let block: String = ordered
        .into_iter()
        .filter_map(|fragment| {
            let text = fragment.text.trim();
            (!text.is_empty()).then(|| format!("Location: {}s - {}\n", fragment.timestamp_seconds, text))
        })
        .collect();

    (!block.is_empty()).then_some(block)
}

/// Full user prompt for the cleanup request
pub fn build_cleanup_prompt(block: &str) -> String {
    format!("{}\n{}.\n{}", INSTRUCTIONS, block, RESPONSE_SHAPE)
}

/// Parse the completion into a time-offset map ordered by numeric offset
pub fn parse_cleanup_response(content: &str) -> Result<TimedText> {
    let body = strip_code_fence(content.trim());

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let object = match value {
        serde_json::Value::Object(object) => object,
        other => {
            return Err(PipelineError::Parse(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            )))
        }
    };

    let mut entries = Vec::with_capacity(object.len());
    for (offset, value) in object {
        match value {
            serde_json::Value::String(text) => entries.push((offset, text)),
            other => {
                return Err(PipelineError::Parse(format!(
                    "value at \"{}\" is {}, expected a string",
                    offset,
                    json_type(&other)
                )))
            }
        }
    }

    // Numeric offsets first in ascending order, anything else after
    entries.sort_by(|(a, _), (b, _)| {
        match (a.trim().parse::<f64>().ok(), b.trim().parse::<f64>().ok()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });

    Ok(entries.into_iter().collect())
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    // Drop an optional language tag on the opening fence line
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Deduplicates and tidies OCR output through a text-completion model
pub struct OcrCleanup {
    llm: Arc<dyn LLM>,
    timeout: Duration,
}

impl OcrCleanup {
    pub fn new(llm: Arc<dyn LLM>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn clean(&self, fragments: &[OcrFragment]) -> Result<TimedText> {
        let Some(block) = build_ocr_block(fragments) else {
            info!("🧹 No on-screen text to clean up");
            return Ok(TimedText::new());
        };

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_cleanup_prompt(&block)),
        ];

        debug!("Sending {} bytes of OCR text for cleanup", block.len());

        let response = tokio::time::timeout(
            self.timeout,
            self.llm.chat(messages, ResponseFormat::JsonObject),
        )
        .await
        .map_err(|_| {
            PipelineError::capability(
                Capability::TextCompletion,
                anyhow::anyhow!("timed out after {:?}", self.timeout),
            )
        })?
        .map_err(|e| PipelineError::capability(Capability::TextCompletion, e))?;

        let cleaned = parse_cleanup_response(&response.content)?;
        info!(
            "🧹 Cleaned {} OCR fragments into {} segments",
            fragments.len(),
            cleaned.len()
        );
        Ok(cleaned)
    }
}
