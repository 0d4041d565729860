//! Failure taxonomy for a video-processing job.
//!
//! Every failure is fail-fast: the first error from either branch of a job
//! aborts it and no partial knowledge record is delivered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// External capabilities the pipeline calls out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    SpeechToText,
    ImageUnderstanding,
    TextCompletion,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::SpeechToText => "speech-to-text",
            Capability::ImageUnderstanding => "image understanding",
            Capability::TextCompletion => "text completion",
        };
        f.write_str(name)
    }
}

/// Coarse failure category reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ExtractionFailure,
    WorkerFailure,
    ExternalCapabilityFailure,
    ParseFailure,
}

/// Errors that abort a job
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Transcoder failed on audio or frame extraction, or scratch storage was unusable
    #[error("{stage} extraction failed: {message}")]
    Extraction { stage: &'static str, message: String },

    /// A similarity or OCR worker errored, panicked or timed out
    #[error("{pool} worker failed: {message}")]
    Worker { pool: &'static str, message: String },

    /// Speech-to-text, vision or completion call errored or timed out
    #[error("{capability} call failed: {source:#}")]
    ExternalCapability {
        capability: Capability,
        #[source]
        source: anyhow::Error,
    },

    /// Cleanup response was not well-formed structured data
    #[error("Failed to parse cleanup response: {0}")]
    Parse(String),
}

impl PipelineError {
    pub fn extraction(stage: &'static str, message: impl fmt::Display) -> Self {
        Self::Extraction {
            stage,
            message: message.to_string(),
        }
    }

    pub fn worker(pool: &'static str, message: impl fmt::Display) -> Self {
        Self::Worker {
            pool,
            message: message.to_string(),
        }
    }

    pub fn capability(capability: Capability, source: anyhow::Error) -> Self {
        Self::ExternalCapability { capability, source }
    }

    /// Category of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Extraction { .. } => FailureKind::ExtractionFailure,
            Self::Worker { .. } => FailureKind::WorkerFailure,
            Self::ExternalCapability { .. } => FailureKind::ExternalCapabilityFailure,
            Self::Parse(_) => FailureKind::ParseFailure,
        }
    }
}
