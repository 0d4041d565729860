use anyhow::{anyhow, bail, Context};
use image::DynamicImage;
use image_compare::Algorithm;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::pool::{WorkerContext, WorkerPool};
use crate::video::FramePair;

/// Computes a similarity score in [0, 1] between two frame images (1 = identical)
pub trait FrameComparator: Send + Sync {
    fn compare(&self, first: &Path, second: &Path) -> anyhow::Result<f64>;
}

/// Structural similarity over full-resolution frames
#[derive(Debug, Clone, Default)]
pub struct SsimComparator;

impl SsimComparator {
    pub fn new() -> Self {
        Self
    }

    /// Score two decoded images. Both must share the same dimensions.
    pub fn score_images(&self, first: &DynamicImage, second: &DynamicImage) -> anyhow::Result<f64> {
        if first.width() != second.width() || first.height() != second.height() {
            bail!(
                "frame dimensions differ: {}x{} vs {}x{}",
                first.width(),
                first.height(),
                second.width(),
                second.height()
            );
        }

        // Colour and alpha are dropped; structure is compared on luma only
        let similarity = image_compare::gray_similarity_structure(
            &Algorithm::MSSIMSimple,
            &first.to_luma8(),
            &second.to_luma8(),
        )
        .map_err(|e| anyhow!("SSIM comparison failed: {}", e))?;

        Ok(similarity.score.clamp(0.0, 1.0))
    }
}

impl FrameComparator for SsimComparator {
    fn compare(&self, first: &Path, second: &Path) -> anyhow::Result<f64> {
        let first_image =
            image::open(first).with_context(|| format!("Failed to decode {}", first.display()))?;
        let second_image =
            image::open(second).with_context(|| format!("Failed to decode {}", second.display()))?;

        self.score_images(&first_image, &second_image)
    }
}

/// Scores every adjacent frame pair across a fixed set of parallel workers
pub struct SimilarityPool {
    pool: WorkerPool,
    comparator: Arc<dyn FrameComparator>,
}

impl SimilarityPool {
    pub fn new(pool: WorkerPool, comparator: Arc<dyn FrameComparator>) -> Self {
        Self { pool, comparator }
    }

    /// Returns `scores[i]` for pair (frame i, frame i+1), in pair order
    pub async fn score(&self, pairs: Vec<FramePair>) -> Result<Vec<f64>> {
        let start = Instant::now();
        let pair_count = pairs.len();
        let comparator = Arc::clone(&self.comparator);

        let slices = self
            .pool
            .dispatch(pairs, move |context, slice| {
                let comparator = Arc::clone(&comparator);
                async move {
                    let scores = tokio::task::spawn_blocking(move || {
                        score_slice(comparator.as_ref(), &context, slice)
                    })
                    .await
                    .map_err(|e| anyhow!("similarity task failed: {}", e))?;
                    scores
                }
            })
            .await?;

        let scores = slices.concat();
        info!(
            "📐 Scored {} frame pairs with {} workers in {:.2}s",
            pair_count,
            self.pool.workers(),
            start.elapsed().as_secs_f64()
        );
        Ok(scores)
    }
}

fn score_slice(
    comparator: &dyn FrameComparator,
    context: &WorkerContext,
    slice: Vec<FramePair>,
) -> anyhow::Result<Vec<f64>> {
    let mut scores = Vec::with_capacity(slice.len());

    for pair in slice {
        if context.cancel.is_cancelled() {
            bail!("cancelled before pair {}", pair.index);
        }

        let score = comparator
            .compare(&pair.first, &pair.second)
            .with_context(|| format!("pair {}", pair.index))?;
        debug!("Worker {}: pair {} scored {:.4}", context.id, pair.index, score);
        scores.push(score);
    }

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn checkerboard(size: u32, cell: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn test_identical_images_score_one() {
        let image = checkerboard(64, 8);
        let score = SsimComparator::new().score_images(&image, &image).unwrap();
        assert!(score > 0.999, "score was {}", score);
    }

    #[test]
    fn test_different_images_score_low() {
        let first = checkerboard(64, 8);
        let second = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])));
        let score = SsimComparator::new().score_images(&first, &second).unwrap();
        assert!(score < 0.94, "score was {}", score);
    }

    #[test]
    fn test_alpha_channel_does_not_change_score() {
        let opaque = checkerboard(64, 8);
        let with_alpha = DynamicImage::ImageRgba8(opaque.to_rgba8());
        let score = SsimComparator::new().score_images(&opaque, &with_alpha).unwrap();
        assert!(score > 0.999, "score was {}", score);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let first = checkerboard(64, 8);
        let second = checkerboard(32, 8);
        assert!(SsimComparator::new().score_images(&first, &second).is_err());
    }

    #[test]
    fn test_compare_decodes_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frame-00001.png");
        checkerboard(32, 4).save(&path).unwrap();

        let score = SsimComparator::new().compare(&path, &path).unwrap();
        assert!(score > 0.999);

        assert!(SsimComparator::new()
            .compare(&path, &temp_dir.path().join("missing.png"))
            .is_err());
    }

    struct TableComparator {
        scores: HashMap<PathBuf, f64>,
    }

    impl FrameComparator for TableComparator {
        fn compare(&self, first: &Path, _second: &Path) -> anyhow::Result<f64> {
            self.scores
                .get(first)
                .copied()
                .ok_or_else(|| anyhow!("unknown frame {}", first.display()))
        }
    }

    #[tokio::test]
    async fn test_pool_preserves_pair_order() {
        let expected = vec![0.99, 0.99, 0.93, 0.99, 0.5, 0.99, 0.99, 0.99, 0.99];
        let pairs: Vec<FramePair> = (0..expected.len())
            .map(|index| FramePair {
                index,
                first: PathBuf::from(format!("{}.jpg", index)),
                second: PathBuf::from(format!("{}.jpg", index + 1)),
            })
            .collect();
        let comparator = Arc::new(TableComparator {
            scores: pairs
                .iter()
                .map(|pair| (pair.first.clone(), expected[pair.index]))
                .collect(),
        });

        for workers in [1, 2, 5] {
            let pool = SimilarityPool::new(
                WorkerPool::new("similarity", workers, Duration::from_secs(5)),
                comparator.clone(),
            );
            let scores = pool.score(pairs.clone()).await.unwrap();
            assert_eq!(scores, expected, "workers = {}", workers);
        }
    }

    #[tokio::test]
    async fn test_pool_fails_on_unreadable_pair() {
        let pool = SimilarityPool::new(
            WorkerPool::new("similarity", 2, Duration::from_secs(5)),
            Arc::new(TableComparator {
                scores: HashMap::new(),
            }),
        );
        let pairs = vec![FramePair {
            index: 0,
            first: PathBuf::from("0.jpg"),
            second: PathBuf::from("1.jpg"),
        }];

        let err = pool.score(pairs).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::WorkerFailure);
    }
}
