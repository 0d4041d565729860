use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscoderConfig;
use crate::video::FrameNaming;

/// External media transcoding used by the pipeline
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Extract the audio track of `video` into `output`
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<PathBuf>;

    /// Sample `fps` frames per second of `video` into `out_dir`, named after `naming`
    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        fps: u32,
        naming: &FrameNaming,
    ) -> Result<()>;
}

/// Transcoder backed by the ffmpeg command line
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    audio_codec: String,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }

    /// Check that ffmpeg can be executed
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| anyhow!("ffmpeg not found at '{}': {}", self.ffmpeg_path, e))?;

        if !output.status.success() {
            return Err(anyhow!("ffmpeg -version exited with {}", output.status));
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .kill_on_drop(true);
        command
    }

    async fn run(&self, mut command: Command) -> Result<()> {
        debug!("Running {:?}", command);

        let output = command
            .output()
            .await
            .map_err(|e| anyhow!("Failed to start {}: {}", self.ffmpeg_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<PathBuf> {
        info!("🎵 Extracting audio from: {}", video.display());

        let mut command = self.command();
        command
            .arg("-i")
            .arg(video)
            .args(["-vn", "-acodec", self.audio_codec.as_str(), "-y"])
            .arg(output);
        self.run(command).await?;

        Ok(output.to_path_buf())
    }

    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        fps: u32,
        naming: &FrameNaming,
    ) -> Result<()> {
        info!("🎞️  Sampling frames at {} fps from: {}", fps, video.display());

        let filter = format!("fps={}", fps);
        let pattern = out_dir.join(naming.ffmpeg_pattern());

        let mut command = self.command();
        command
            .arg("-i")
            .arg(video)
            .args(["-vf", filter.as_str(), "-y"])
            .arg(pattern);
        self.run(command).await
    }
}
