//! Video Knowledge - video analysis pipeline
//!
//! Turns a video into a timestamped knowledge record: a transcript, the
//! on-screen text of visually stable frames, and a scene description.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod jobs;
pub mod knowledge;
pub mod llm;
pub mod media;
pub mod ocr;
pub mod pipeline;
pub mod pool;
pub mod selector;
pub mod similarity;
pub mod transcription;
pub mod video;
pub mod vision;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Capability, FailureKind, PipelineError, Result};
pub use crate::jobs::{Job, JobHandle, JobOutcome, JobRunner, KnowledgeStore};
pub use crate::knowledge::{TimedText, VideoKnowledge};
pub use crate::llm::{LLMConfig, LLMProvider};
pub use crate::pipeline::{PipelineComponents, PipelineSettings, PipelineStats, VideoPipeline};
pub use crate::selector::{SelectorConfig, StableFrameSelector};
