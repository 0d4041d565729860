use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cleanup::OcrCleanup;
use crate::config::Config;
use crate::error::{Capability, PipelineError, Result};
use crate::jobs::Job;
use crate::knowledge::{TimedText, VideoKnowledge};
use crate::llm::{create_llm, LLM};
use crate::media::{FfmpegTranscoder, MediaTranscoder};
use crate::ocr::{OcrPool, TesseractRecognizer, TextRecognizer};
use crate::pool::WorkerPool;
use crate::selector::{select_stable_frames, SelectorConfig};
use crate::similarity::{FrameComparator, SimilarityPool, SsimComparator};
use crate::transcription::{SpeechToText, TranscriptionPipeline, WhisperApiTranscriber};
use crate::video::{frame_pairs, Frame, FrameExtractor, FrameNaming};
use crate::vision::{ImageDescriber, OpenAIVisionDescriber};

/// Stages of the frame/OCR chain of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStage {
    Extracting,
    Comparing,
    Selecting,
    Recognizing,
    Merging,
    Done,
}

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct PipelineComponents {
    pub transcoder: Arc<dyn MediaTranscoder>,
    pub comparator: Arc<dyn FrameComparator>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub describer: Arc<dyn ImageDescriber>,
    pub llm: Arc<dyn LLM>,
}

impl PipelineComponents {
    /// Production components: ffmpeg, SSIM, tesseract and the configured HTTP services
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let llm: Arc<dyn LLM> = Arc::from(create_llm(&config.llm)?);

        Ok(Self {
            transcoder: Arc::new(FfmpegTranscoder::new(&config.transcoder)),
            comparator: Arc::new(SsimComparator::new()),
            recognizer: Arc::new(TesseractRecognizer::new(&config.ocr)),
            speech_to_text: Arc::new(WhisperApiTranscriber::new(config.transcription.clone())?),
            describer: Arc::new(OpenAIVisionDescriber::new(config.vision.clone())?),
            llm,
        })
    }
}

/// Tunables of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frames_per_second: u32,
    pub similarity_workers: usize,
    pub ocr_workers: usize,
    pub selector: SelectorConfig,
    pub naming: FrameNaming,
    pub audio_extension: String,
    pub worker_timeout: Duration,
    pub capability_timeout: Duration,
    pub transcoder_timeout: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            frames_per_second: config.pipeline.frames_per_second,
            similarity_workers: config.pipeline.similarity_workers,
            ocr_workers: config.pipeline.ocr_workers,
            selector: config.pipeline.selector(),
            naming: FrameNaming::from(&config.transcoder),
            audio_extension: config.transcoder.audio_extension.clone(),
            worker_timeout: config.pipeline.worker_timeout(),
            capability_timeout: config.pipeline.capability_timeout(),
            transcoder_timeout: config.pipeline.transcoder_timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Counters and timings of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_extracted: usize,
    pub pairs_scored: usize,
    pub stable_frames: usize,
    pub ocr_fragments: usize,
    pub transcript_segments: usize,
    pub on_screen_segments: usize,
    pub extraction_time: Duration,
    pub similarity_time: Duration,
    pub recognition_time: Duration,
    pub total_time: Duration,
}

impl PipelineStats {
    fn log(&self) {
        info!("📊 Pipeline statistics:");
        info!("   Frames extracted: {}", self.frames_extracted);
        info!("   Pairs scored: {}", self.pairs_scored);
        info!("   Stable frames: {}", self.stable_frames);
        info!("   OCR fragments: {} → {} cleaned segments", self.ocr_fragments, self.on_screen_segments);
        info!("   Transcript segments: {}", self.transcript_segments);
        info!(
            "   Timings: extraction {:.2}s, similarity {:.2}s, recognition {:.2}s, total {:.2}s",
            self.extraction_time.as_secs_f64(),
            self.similarity_time.as_secs_f64(),
            self.recognition_time.as_secs_f64(),
            self.total_time.as_secs_f64()
        );
    }
}

/// Record plus the statistics of the run that produced it
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub knowledge: VideoKnowledge,
    pub stats: PipelineStats,
}

struct FrameChainOutput {
    on_screen_text: TimedText,
    scene_description: String,
    stats: PipelineStats,
}

/// Runs transcription and the frame/OCR chain of a job concurrently and merges them
pub struct VideoPipeline {
    frame_extractor: FrameExtractor,
    similarity: SimilarityPool,
    selector: SelectorConfig,
    ocr: OcrPool,
    cleanup: OcrCleanup,
    describer: Arc<dyn ImageDescriber>,
    transcription: TranscriptionPipeline,
    capability_timeout: Duration,
}

impl VideoPipeline {
    pub fn new(components: PipelineComponents, settings: PipelineSettings) -> Self {
        let frame_extractor = FrameExtractor::new(
            Arc::clone(&components.transcoder),
            settings.naming.clone(),
            settings.frames_per_second,
            settings.transcoder_timeout,
        );
        let similarity = SimilarityPool::new(
            WorkerPool::new("similarity", settings.similarity_workers, settings.worker_timeout),
            components.comparator,
        );
        let ocr = OcrPool::new(
            WorkerPool::new("ocr", settings.ocr_workers, settings.worker_timeout),
            components.recognizer,
            settings.capability_timeout,
        );
        let transcription = TranscriptionPipeline::new(
            components.transcoder,
            components.speech_to_text,
            &settings.audio_extension,
            settings.transcoder_timeout,
            settings.capability_timeout,
        );

        Self {
            frame_extractor,
            similarity,
            selector: settings.selector,
            ocr,
            cleanup: OcrCleanup::new(components.llm, settings.capability_timeout),
            describer: components.describer,
            transcription,
            capability_timeout: settings.capability_timeout,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            PipelineComponents::from_config(config)?,
            PipelineSettings::from(config),
        ))
    }

    /// Process the job's video inside its scratch arena
    pub async fn run(&self, job: &Job) -> Result<VideoKnowledge> {
        info!("🎬 Job {}: processing {}", job.key(), job.video_path().display());
        let output = self.process(job.video_path(), job.scratch_dir()).await?;
        output.stats.log();
        Ok(output.knowledge)
    }

    /// Both branches must succeed; the first failure abandons the other
    pub async fn process(&self, video: &Path, scratch_dir: &Path) -> Result<PipelineOutput> {
        let start = Instant::now();

        let (transcript, chain) = tokio::try_join!(
            self.transcription.run(video, scratch_dir),
            self.frame_chain(video, scratch_dir),
        )?;

        enter(JobStage::Merging);
        let mut stats = chain.stats;
        stats.transcript_segments = transcript.len();
        stats.total_time = start.elapsed();

        let knowledge = VideoKnowledge {
            transcript,
            on_screen_text: chain.on_screen_text,
            scene_description: chain.scene_description,
        };
        enter(JobStage::Done);

        Ok(PipelineOutput { knowledge, stats })
    }

    async fn frame_chain(&self, video: &Path, scratch_dir: &Path) -> Result<FrameChainOutput> {
        let mut stats = PipelineStats::default();

        enter(JobStage::Extracting);
        let started = Instant::now();
        let frames = self
            .frame_extractor
            .extract(video, &scratch_dir.join("frames"))
            .await?;
        stats.frames_extracted = frames.len();
        stats.extraction_time = started.elapsed();

        enter(JobStage::Comparing);
        let started = Instant::now();
        let pairs = frame_pairs(&frames);
        stats.pairs_scored = pairs.len();
        let scores = self.similarity.score(pairs).await?;
        stats.similarity_time = started.elapsed();

        enter(JobStage::Selecting);
        let stable: Vec<Frame> = select_stable_frames(&scores, self.selector)
            .into_iter()
            .map(|index| frames[index].clone())
            .collect();
        stats.stable_frames = stable.len();
        info!("🎯 Selected {} stable frames out of {}", stable.len(), frames.len());

        if stable.is_empty() {
            return Ok(FrameChainOutput {
                on_screen_text: TimedText::new(),
                scene_description: String::new(),
                stats,
            });
        }

        enter(JobStage::Recognizing);
        let started = Instant::now();
        let images: Vec<PathBuf> = stable.iter().map(|frame| frame.path.clone()).collect();

        let recognize_and_clean = async {
            let fragments = self.ocr.recognize(stable).await?;
            let cleaned = self.cleanup.clean(&fragments).await?;
            Ok::<_, PipelineError>((fragments.len(), cleaned))
        };

        let ((fragment_count, on_screen_text), scene_description) =
            tokio::try_join!(recognize_and_clean, self.describe(&images))?;

        stats.ocr_fragments = fragment_count;
        stats.on_screen_segments = on_screen_text.len();
        stats.recognition_time = started.elapsed();

        Ok(FrameChainOutput {
            on_screen_text,
            scene_description,
            stats,
        })
    }

    async fn describe(&self, images: &[PathBuf]) -> Result<String> {
        tokio::time::timeout(self.capability_timeout, self.describer.describe(images))
            .await
            .map_err(|_| {
                PipelineError::capability(
                    Capability::ImageUnderstanding,
                    anyhow!("timed out after {:?}", self.capability_timeout),
                )
            })?
            .map_err(|e| PipelineError::capability(Capability::ImageUnderstanding, e))
    }
}

fn enter(stage: JobStage) {
    debug!("Pipeline stage → {:?}", stage);
}
