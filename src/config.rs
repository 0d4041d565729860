use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::LLMConfig;
use crate::selector::SelectorConfig;

/// Configuration for the video knowledge pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame sampling, worker pools and timeouts
    pub pipeline: PipelineConfig,

    /// External media transcoder settings
    pub transcoder: TranscoderConfig,

    /// Text recognition settings
    pub ocr: OcrConfig,

    /// Speech-to-text service settings
    pub transcription: TranscriptionConfig,

    /// Image understanding service settings
    pub vision: VisionConfig,

    /// Text completion settings used for OCR cleanup
    pub llm: LLMConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames sampled per second of video
    pub frames_per_second: u32,

    /// Number of parallel similarity workers
    pub similarity_workers: usize,

    /// Number of parallel OCR workers
    pub ocr_workers: usize,

    /// Similarity above which content is considered settled
    pub stable_threshold: f64,

    /// Similarity below which content is considered changed
    pub motion_threshold: f64,

    /// Root under which each job gets its own scratch directory
    pub scratch_root: PathBuf,

    /// Maximum number of jobs processed at the same time
    pub max_concurrent_jobs: usize,

    /// Timeout per pool worker (seconds)
    pub worker_timeout_secs: u64,

    /// Timeout per external capability call (seconds)
    pub capability_timeout_secs: u64,

    /// Timeout per transcoder invocation (seconds)
    pub transcoder_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// ffmpeg executable
    pub ffmpeg_path: String,

    /// Audio codec used for the extracted track
    pub audio_codec: String,

    /// File extension of the extracted track
    pub audio_extension: String,

    /// Frame file name prefix
    pub frame_prefix: String,

    /// Zero-padded width of the frame sequence number
    pub frame_number_width: usize,

    /// Frame image extension
    pub frame_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// tesseract executable
    pub tesseract_path: String,

    /// Recognition language
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Transcription endpoint (OpenAI compatible)
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model to use for transcription
    pub model: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Chat completions endpoint accepting image content
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Vision-capable model
    pub model: String,

    /// Maximum tokens of the description
    pub max_tokens: u32,

    /// Prompt sent along with the frames
    pub prompt: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level / filter directive
    pub level: String,
}

impl PipelineConfig {
    pub fn selector(&self) -> SelectorConfig {
        SelectorConfig {
            stable_threshold: self.stable_threshold,
            motion_threshold: self.motion_threshold,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn transcoder_timeout(&self) -> Duration {
        Duration::from_secs(self.transcoder_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let selector = SelectorConfig::default();
        Self {
            frames_per_second: 1,
            similarity_workers: num_cpus::get(),
            ocr_workers: num_cpus::get(),
            stable_threshold: selector.stable_threshold,
            motion_threshold: selector.motion_threshold,
            scratch_root: std::env::temp_dir().join("video-knowledge"),
            max_concurrent_jobs: 1,
            worker_timeout_secs: 600,
            capability_timeout_secs: 300,
            transcoder_timeout_secs: 900,
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            audio_codec: "libmp3lame".to_string(),
            audio_extension: "mp3".to_string(),
            frame_prefix: "frame".to_string(),
            frame_number_width: 5,
            frame_extension: "jpg".to_string(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            timeout_seconds: 300,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            prompt: "Describe these images. These images were extracted from a video that I own the rights to, what is the video about?".to_string(),
            timeout_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "video_knowledge=info,warn".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            transcoder: TranscoderConfig::default(),
            ocr: OcrConfig::default(),
            transcription: TranscriptionConfig::default(),
            vision: VisionConfig::default(),
            llm: LLMConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file or the default locations, then apply env overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    fn from_default_locations() -> Result<Self> {
        Self::from_first_existing(&[
            Path::new("video-knowledge.toml"),
            Path::new("config/video-knowledge.toml"),
        ])
    }

    /// First existing file wins; a file that exists but does not parse is an error
    fn from_first_existing(paths: &[&Path]) -> Result<Self> {
        match paths.iter().find(|path| path.exists()) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            self.transcription.api_key.get_or_insert_with(|| api_key.clone());
            self.vision.api_key.get_or_insert_with(|| api_key.clone());
            self.llm.api_key.get_or_insert(api_key);
        }

        if let Ok(workers) = std::env::var("VIDEO_KNOWLEDGE_WORKERS") {
            match workers.parse::<usize>() {
                Ok(workers) => {
                    self.pipeline.similarity_workers = workers;
                    self.pipeline.ocr_workers = workers;
                }
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_KNOWLEDGE_WORKERS: {}", workers),
            }
        }

        if let Ok(fps) = std::env::var("VIDEO_KNOWLEDGE_FPS") {
            match fps.parse::<u32>() {
                Ok(fps) => self.pipeline.frames_per_second = fps,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_KNOWLEDGE_FPS: {}", fps),
            }
        }

        if let Ok(dir) = std::env::var("VIDEO_KNOWLEDGE_SCRATCH_DIR") {
            self.pipeline.scratch_root = PathBuf::from(dir);
        }

        if let Ok(level) = std::env::var("VIDEO_KNOWLEDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;

        if pipeline.frames_per_second == 0 {
            return Err(anyhow!("frames_per_second must be greater than 0"));
        }

        if pipeline.similarity_workers == 0 || pipeline.ocr_workers == 0 {
            return Err(anyhow!("worker counts must be greater than 0"));
        }

        if pipeline.max_concurrent_jobs == 0 {
            return Err(anyhow!("max_concurrent_jobs must be greater than 0"));
        }

        for (name, value) in [
            ("stable_threshold", pipeline.stable_threshold),
            ("motion_threshold", pipeline.motion_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }

        if pipeline.motion_threshold > pipeline.stable_threshold {
            return Err(anyhow!(
                "motion_threshold ({}) must not exceed stable_threshold ({})",
                pipeline.motion_threshold,
                pipeline.stable_threshold
            ));
        }

        if pipeline.worker_timeout_secs == 0
            || pipeline.capability_timeout_secs == 0
            || pipeline.transcoder_timeout_secs == 0
        {
            return Err(anyhow!("timeouts must be greater than 0"));
        }

        if self.transcoder.frame_number_width == 0 {
            return Err(anyhow!("frame_number_width must be greater than 0"));
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Knowledge Configuration:\n\
            - Sampling: {} fps\n\
            - Similarity workers: {}\n\
            - OCR workers: {}\n\
            - Thresholds: stable > {}, motion < {}\n\
            - Scratch root: {}\n\
            - Transcription model: {}\n\
            - Vision model: {}\n\
            - Cleanup model: {} ({:?})",
            self.pipeline.frames_per_second,
            self.pipeline.similarity_workers,
            self.pipeline.ocr_workers,
            self.pipeline.stable_threshold,
            self.pipeline.motion_threshold,
            self.pipeline.scratch_root.display(),
            self.transcription.model,
            self.vision.model,
            self.llm.model,
            self.llm.provider,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.pipeline.similarity_workers = workers;
        self.config.pipeline.ocr_workers = workers;
        self
    }

    pub fn with_frames_per_second(mut self, fps: u32) -> Self {
        self.config.pipeline.frames_per_second = fps;
        self
    }

    pub fn with_scratch_root(mut self, dir: PathBuf) -> Self {
        self.config.pipeline.scratch_root = dir;
        self
    }

    pub fn with_thresholds(mut self, stable: f64, motion: f64) -> Self {
        self.config.pipeline.stable_threshold = stable;
        self.config.pipeline.motion_threshold = motion;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.transcription.api_key = Some(api_key.clone());
        self.config.vision.api_key = Some(api_key.clone());
        self.config.llm.api_key = Some(api_key);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
