use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use video_knowledge::llm::create_llm;
use video_knowledge::media::FfmpegTranscoder;
use video_knowledge::ocr::TesseractRecognizer;
use video_knowledge::{Config, JobOutcome, JobRunner, KnowledgeStore, VideoPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Video Knowledge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Extract a timestamped knowledge record (transcript, on-screen text, scene description) from a video")
        .arg(
            Arg::new("video")
                .short('i')
                .long("video")
                .value_name("FILE")
                .help("Video file to analyze")
                .required(true),
        )
        .arg(
            Arg::new("key")
                .short('k')
                .long("key")
                .value_name("KEY")
                .help("Job key (derived from the video path when omitted)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of similarity and OCR workers")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("scratch-dir")
                .long("scratch-dir")
                .value_name("DIR")
                .help("Root directory for per-job scratch space"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the result to FILE instead of stdout"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .value_parser(["json", "prompt"])
                .default_value("json"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = Config::load(matches.get_one::<String>("config").map(PathBuf::from).as_deref())?;

    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.pipeline.similarity_workers = workers;
        config.pipeline.ocr_workers = workers;
    }
    if let Some(dir) = matches.get_one::<String>("scratch-dir") {
        config.pipeline.scratch_root = PathBuf::from(dir);
    }

    let filter = if matches.get_flag("verbose") {
        EnvFilter::new("video_knowledge=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    let video = PathBuf::from(
        matches
            .get_one::<String>("video")
            .ok_or_else(|| anyhow!("--video is required"))?,
    );
    if !video.exists() {
        error!("Video file does not exist: {}", video.display());
        return Err(anyhow!("Video file not found: {}", video.display()));
    }

    let key = match matches.get_one::<String>("key") {
        Some(key) => key.clone(),
        None => derive_job_key(&video),
    };

    info!("🚀 Video Knowledge starting...");
    info!("📹 Video: {}", video.display());
    info!("🔑 Job key: {}", key);
    info!("{}", config.summary());

    check_dependencies(&config).await;

    let pipeline = Arc::new(VideoPipeline::from_config(&config)?);
    let runner = JobRunner::new(
        pipeline,
        KnowledgeStore::new(),
        config.pipeline.scratch_root.clone(),
        config.pipeline.max_concurrent_jobs,
    );

    let start_time = std::time::Instant::now();
    let outcome = runner.submit(key, video).outcome().await;

    let knowledge = match outcome {
        JobOutcome::Completed { knowledge, .. } => knowledge,
        JobOutcome::Failed { kind, message, .. } => {
            error!("❌ Job failed ({:?}): {}", kind, message);
            return Err(anyhow!("Job failed: {}", message));
        }
    };

    info!("🎉 Processing completed in {:.2}s", start_time.elapsed().as_secs_f64());

    let rendered = match matches.get_one::<String>("format").map(String::as_str) {
        Some("prompt") => knowledge.to_context_prompt(),
        _ => serde_json::to_string_pretty(&knowledge)?,
    };

    match matches.get_one::<String>("output") {
        Some(path) => {
            tokio::fs::write(path, rendered).await?;
            info!("💾 Result written to: {}", path);
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn derive_job_key(video: &std::path::Path) -> String {
    let seed = format!("{}:{}", video.display(), chrono::Utc::now().timestamp_millis());
    format!("{:x}", md5::compute(seed.as_bytes()))
}

async fn check_dependencies(config: &Config) {
    if let Err(e) = FfmpegTranscoder::new(&config.transcoder).check_available().await {
        warn!("⚠️  {}", e);
    }
    if let Err(e) = TesseractRecognizer::new(&config.ocr).check_available().await {
        warn!("⚠️  {}", e);
    }
    if config.transcription.api_key.is_none() || config.vision.api_key.is_none() {
        warn!("⚠️  No API key configured for transcription or vision (set OPENAI_API_KEY)");
    }
    match create_llm(&config.llm) {
        Ok(llm) => {
            if !llm.is_available().await {
                warn!("⚠️  {:?} endpoint not reachable: {}", llm.provider_type(), config.llm.resolved_endpoint());
            }
        }
        Err(e) => warn!("⚠️  Cleanup LLM unavailable: {}", e),
    }
}
