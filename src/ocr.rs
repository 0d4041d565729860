use anyhow::{anyhow, bail, Context, Result as AnyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::video::Frame;

/// Text recognized on one stable frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrFragment {
    /// Index of the frame in the full sampled sequence
    pub frame_index: usize,
    pub timestamp_seconds: f64,
    pub text: String,
}

/// Extracts on-screen text from an image
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> AnyResult<String>;
}

/// Text recognition through the tesseract command line
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    tesseract_path: String,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            tesseract_path: config.tesseract_path.clone(),
            language: config.language.clone(),
        }
    }

    /// Check that tesseract can be executed
    pub async fn check_available(&self) -> AnyResult<()> {
        let output = Command::new(&self.tesseract_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| anyhow!("tesseract not found at '{}': {}", self.tesseract_path, e))?;

        if !output.status.success() {
            bail!("tesseract --version exited with {}", output.status);
        }
        Ok(())
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &Path) -> AnyResult<String> {
        let output = Command::new(&self.tesseract_path)
            .arg(image)
            .arg("stdout")
            .args(["-l", self.language.as_str()])
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.tesseract_path))?;

        if !output.status.success() {
            bail!(
                "tesseract failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs text recognition over stable frames across a fixed set of workers
pub struct OcrPool {
    pool: WorkerPool,
    recognizer: Arc<dyn TextRecognizer>,
    call_timeout: Duration,
}

impl OcrPool {
    pub fn new(pool: WorkerPool, recognizer: Arc<dyn TextRecognizer>, call_timeout: Duration) -> Self {
        Self {
            pool,
            recognizer,
            call_timeout,
        }
    }

    /// One fragment per frame, tagged with the frame's own index.
    ///
    /// Fragment order across chunks carries no meaning; key by `frame_index`.
    pub async fn recognize(&self, frames: Vec<Frame>) -> Result<Vec<OcrFragment>> {
        let start = Instant::now();
        let frame_count = frames.len();
        let recognizer = Arc::clone(&self.recognizer);
        let call_timeout = self.call_timeout;

        let chunks = self
            .pool
            .dispatch(frames, move |context, chunk| {
                let recognizer = Arc::clone(&recognizer);
                async move {
                    let mut fragments = Vec::with_capacity(chunk.len());

                    for frame in chunk {
                        if context.cancel.is_cancelled() {
                            bail!("cancelled before frame {}", frame.index);
                        }

                        let text = tokio::time::timeout(call_timeout, recognizer.recognize(&frame.path))
                            .await
                            .map_err(|_| {
                                anyhow!("recognition of frame {} timed out after {:?}", frame.index, call_timeout)
                            })?
                            .with_context(|| format!("frame {}", frame.index))?;

                        debug!("Worker {}: frame {} → {} chars", context.id, frame.index, text.len());
                        fragments.push(OcrFragment {
                            frame_index: frame.index,
                            timestamp_seconds: frame.timestamp_seconds,
                            text,
                        });
                    }

                    Ok::<_, anyhow::Error>(fragments)
                }
            })
            .await?;

        let fragments: Vec<OcrFragment> = chunks.into_iter().flatten().collect();
        info!(
            "🔤 Recognized text on {} frames with {} workers in {:.2}s",
            frame_count,
            self.pool.workers(),
            start.elapsed().as_secs_f64()
        );
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct FileNameRecognizer;

    #[async_trait]
    impl TextRecognizer for FileNameRecognizer {
        async fn recognize(&self, image: &Path) -> AnyResult<String> {
            Ok(format!("text of {}", image.display()))
        }
    }

    struct FailingRecognizer;

    #[async_trait]
    impl TextRecognizer for FailingRecognizer {
        async fn recognize(&self, image: &Path) -> AnyResult<String> {
            if image.ends_with("7.jpg") {
                bail!("unreadable image");
            }
            Ok(String::new())
        }
    }

    fn stable_frames(indices: &[usize]) -> Vec<Frame> {
        indices
            .iter()
            .map(|&index| Frame {
                index,
                path: PathBuf::from(format!("{}.jpg", index)),
                timestamp_seconds: index as f64,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_union_matches_serial_for_any_worker_count() {
        let frames = stable_frames(&[0, 3, 5, 7, 11, 12, 20]);

        let mut serial = BTreeMap::new();
        for frame in &frames {
            serial.insert(
                frame.index,
                FileNameRecognizer.recognize(&frame.path).await.unwrap(),
            );
        }

        for workers in 1..=8 {
            let pool = OcrPool::new(
                WorkerPool::new("ocr", workers, Duration::from_secs(5)),
                Arc::new(FileNameRecognizer),
                Duration::from_secs(5),
            );
            let fragments = pool.recognize(frames.clone()).await.unwrap();
            assert_eq!(fragments.len(), frames.len(), "workers = {}", workers);

            let union: BTreeMap<usize, String> = fragments
                .into_iter()
                .map(|fragment| (fragment.frame_index, fragment.text))
                .collect();
            assert_eq!(union, serial, "workers = {}", workers);
        }
    }

    #[tokio::test]
    async fn test_fragment_keeps_frame_timestamp() {
        let pool = OcrPool::new(
            WorkerPool::new("ocr", 2, Duration::from_secs(5)),
            Arc::new(FileNameRecognizer),
            Duration::from_secs(5),
        );
        let fragments = pool.recognize(stable_frames(&[4])).await.unwrap();
        assert_eq!(fragments[0].frame_index, 4);
        assert!((fragments[0].timestamp_seconds - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_one_failing_frame_fails_pool() {
        let pool = OcrPool::new(
            WorkerPool::new("ocr", 3, Duration::from_secs(5)),
            Arc::new(FailingRecognizer),
            Duration::from_secs(5),
        );
        let err = pool.recognize(stable_frames(&[1, 3, 7, 9])).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::WorkerFailure);
        assert!(err.to_string().contains("frame 7"));
    }
}
