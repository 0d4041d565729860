use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TranscoderConfig;
use crate::error::{PipelineError, Result};
use crate::media::MediaTranscoder;

/// Naming scheme of sampled frame files, e.g. `frame-00001.jpg`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameNaming {
    pub prefix: String,
    pub width: usize,
    pub extension: String,
}

impl Default for FrameNaming {
    fn default() -> Self {
        Self {
            prefix: "frame".to_string(),
            width: 5,
            extension: "jpg".to_string(),
        }
    }
}

impl From<&TranscoderConfig> for FrameNaming {
    fn from(config: &TranscoderConfig) -> Self {
        Self {
            prefix: config.frame_prefix.clone(),
            width: config.frame_number_width,
            extension: config.frame_extension.clone(),
        }
    }
}

impl FrameNaming {
    /// Output pattern handed to the transcoder
    pub fn ffmpeg_pattern(&self) -> String {
        format!("{}-%0{}d.{}", self.prefix, self.width, self.extension)
    }

    /// File name of the frame with sequence number `number`
    pub fn file_name(&self, number: u64) -> String {
        format!(
            "{}-{:0width$}.{}",
            self.prefix,
            number,
            self.extension,
            width = self.width
        )
    }

    fn matcher(&self) -> Result<Regex> {
        Regex::new(&format!(
            r"^{}-(\d+)\.{}$",
            regex::escape(&self.prefix),
            regex::escape(&self.extension)
        ))
        .map_err(|e| PipelineError::extraction("frame", format!("invalid frame naming: {}", e)))
    }

    /// Sequence number of a frame file, `None` for unrelated files
    pub fn parse_number(&self, file_name: &str) -> Option<u64> {
        number_in(&self.matcher().ok()?, file_name)
    }
}

fn number_in(matcher: &Regex, file_name: &str) -> Option<u64> {
    matcher.captures(file_name)?.get(1)?.as_str().parse().ok()
}

/// One sampled still image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// 0-based position in time order
    pub index: usize,
    pub path: PathBuf,
    pub timestamp_seconds: f64,
}

/// Two temporally adjacent frames, keyed by the leading index
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    pub index: usize,
    pub first: PathBuf,
    pub second: PathBuf,
}

/// Build the pairs (i, i+1) for i = 0..N-2
pub fn frame_pairs(frames: &[Frame]) -> Vec<FramePair> {
    frames
        .windows(2)
        .map(|window| FramePair {
            index: window[0].index,
            first: window[0].path.clone(),
            second: window[1].path.clone(),
        })
        .collect()
}

/// Samples a video into an ordered sequence of frames
pub struct FrameExtractor {
    transcoder: Arc<dyn MediaTranscoder>,
    naming: FrameNaming,
    frames_per_second: u32,
    timeout: Duration,
}

impl FrameExtractor {
    pub fn new(
        transcoder: Arc<dyn MediaTranscoder>,
        naming: FrameNaming,
        frames_per_second: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            transcoder,
            naming,
            frames_per_second,
            timeout,
        }
    }

    /// Extract frames of `video` into `frames_dir`, clearing it first
    pub async fn extract(&self, video: &Path, frames_dir: &Path) -> Result<Vec<Frame>> {
        prepare_empty_dir(frames_dir).await?;

        let extraction = self.transcoder.extract_frames(
            video,
            frames_dir,
            self.frames_per_second,
            &self.naming,
        );

        match tokio::time::timeout(self.timeout, extraction).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::extraction("frame", format!("{:#}", e))),
            Err(_) => {
                return Err(PipelineError::extraction(
                    "frame",
                    format!("transcoder timed out after {:?}", self.timeout),
                ))
            }
        }

        let frames = self.collect_frames(frames_dir).await?;
        info!("🖼️  Extracted {} frames from {}", frames.len(), video.display());
        Ok(frames)
    }

    async fn collect_frames(&self, frames_dir: &Path) -> Result<Vec<Frame>> {
        let matcher = self.naming.matcher()?;
        let mut numbered = Vec::new();

        let mut entries = tokio::fs::read_dir(frames_dir)
            .await
            .map_err(|e| PipelineError::extraction("frame", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::extraction("frame", e))?
        {
            let file_name = entry.file_name();
            match number_in(&matcher, &file_name.to_string_lossy()) {
                Some(number) => numbered.push((number, entry.path())),
                None => debug!("Skipping unexpected file: {}", entry.path().display()),
            }
        }

        numbered.sort_by_key(|(number, _)| *number);

        let fps = f64::from(self.frames_per_second);
        Ok(numbered
            .into_iter()
            .enumerate()
            .map(|(index, (_, path))| Frame {
                index,
                path,
                timestamp_seconds: index as f64 / fps,
            })
            .collect())
    }
}

async fn prepare_empty_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| PipelineError::extraction("frame", format!("cannot clear {}: {}", dir.display(), e)))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::extraction("frame", format!("cannot create {}: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct WritingTranscoder {
        count: u64,
    }

    #[async_trait]
    impl MediaTranscoder for WritingTranscoder {
        async fn extract_audio(&self, _video: &Path, output: &Path) -> anyhow::Result<PathBuf> {
            Ok(output.to_path_buf())
        }

        async fn extract_frames(
            &self,
            _video: &Path,
            out_dir: &Path,
            _fps: u32,
            naming: &FrameNaming,
        ) -> anyhow::Result<()> {
            // Written out of order to check numeric sorting
            for number in (1..=self.count).rev() {
                std::fs::write(out_dir.join(naming.file_name(number)), b"")?;
            }
            Ok(())
        }
    }

    struct FailingTranscoder;

    #[async_trait]
    impl MediaTranscoder for FailingTranscoder {
        async fn extract_audio(&self, _video: &Path, _output: &Path) -> anyhow::Result<PathBuf> {
            Err(anyhow::anyhow!("no audio"))
        }

        async fn extract_frames(
            &self,
            _video: &Path,
            _out_dir: &Path,
            _fps: u32,
            _naming: &FrameNaming,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("invalid data found when processing input"))
        }
    }

    #[test]
    fn test_naming() {
        let naming = FrameNaming::default();
        assert_eq!(naming.ffmpeg_pattern(), "frame-%05d.jpg");
        assert_eq!(naming.file_name(12), "frame-00012.jpg");
        assert_eq!(naming.parse_number("frame-00012.jpg"), Some(12));
        assert_eq!(naming.parse_number("frame-123456.jpg"), Some(123456));
        assert_eq!(naming.parse_number("audio.mp3"), None);
        assert_eq!(naming.parse_number("frame-00012.png"), None);
    }

    #[test]
    fn test_frame_pairs() {
        let frames: Vec<Frame> = (0..4)
            .map(|index| Frame {
                index,
                path: PathBuf::from(format!("{}.jpg", index)),
                timestamp_seconds: index as f64,
            })
            .collect();

        let pairs = frame_pairs(&frames);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2].index, 2);
        assert_eq!(pairs[2].first, PathBuf::from("2.jpg"));
        assert_eq!(pairs[2].second, PathBuf::from("3.jpg"));

        assert!(frame_pairs(&frames[..1]).is_empty());
    }

    #[tokio::test]
    async fn test_extract_sorts_and_clears() {
        let temp_dir = TempDir::new().unwrap();
        let frames_dir = temp_dir.path().join("frames");
        std::fs::create_dir_all(&frames_dir).unwrap();
        std::fs::write(frames_dir.join("frame-00099.jpg"), b"stale").unwrap();

        let extractor = FrameExtractor::new(
            Arc::new(WritingTranscoder { count: 12 }),
            FrameNaming::default(),
            2,
            Duration::from_secs(5),
        );

        let frames = extractor
            .extract(Path::new("video.mp4"), &frames_dir)
            .await
            .unwrap();

        assert_eq!(frames.len(), 12);
        assert_eq!(frames[0].path, frames_dir.join("frame-00001.jpg"));
        assert_eq!(frames[11].path, frames_dir.join("frame-00012.jpg"));
        assert_eq!(frames[11].index, 11);
        assert!((frames[3].timestamp_seconds - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_transcoder_failure_is_extraction_failure() {
        let temp_dir = TempDir::new().unwrap();
        let extractor = FrameExtractor::new(
            Arc::new(FailingTranscoder),
            FrameNaming::default(),
            1,
            Duration::from_secs(5),
        );

        let err = extractor
            .extract(Path::new("video.mp4"), &temp_dir.path().join("frames"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::ExtractionFailure);
    }
}
