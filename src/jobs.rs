use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{oneshot, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, PipelineError, Result};
use crate::knowledge::VideoKnowledge;
use crate::pipeline::VideoPipeline;

/// One video-processing run with its own scratch arena.
///
/// The scratch directory is removed when the job is dropped.
#[derive(Debug)]
pub struct Job {
    key: String,
    video_path: PathBuf,
    scratch: TempDir,
}

impl Job {
    /// Create a job and its scratch directory under `scratch_root`
    pub async fn create(key: impl Into<String>, video_path: impl Into<PathBuf>, scratch_root: &Path) -> Result<Self> {
        let key = key.into();

        tokio::fs::create_dir_all(scratch_root).await.map_err(|e| {
            PipelineError::extraction(
                "scratch",
                format!("cannot create {}: {}", scratch_root.display(), e),
            )
        })?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize_key(&key)))
            .tempdir_in(scratch_root)
            .map_err(|e| PipelineError::extraction("scratch", e))?;

        debug!("Job {} scratch arena: {}", key, scratch.path().display());

        Ok(Self {
            key,
            video_path: video_path.into(),
            scratch,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Keep a job key usable as a directory name
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();

    if sanitized.is_empty() {
        "job".to_string()
    } else {
        sanitized
    }
}

/// Result of a job, delivered once to the submitter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed {
        knowledge: VideoKnowledge,
        finished_at: DateTime<Utc>,
    },
    Failed {
        kind: FailureKind,
        message: String,
        finished_at: DateTime<Utc>,
    },
}

impl JobOutcome {
    pub fn completed(knowledge: VideoKnowledge) -> Self {
        Self::Completed {
            knowledge,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: &PipelineError) -> Self {
        Self::Failed {
            kind: error.kind(),
            message: error.to_string(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn knowledge(&self) -> Option<&VideoKnowledge> {
        match self {
            Self::Completed { knowledge, .. } => Some(knowledge),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub completed: usize,
    pub failed: usize,
}

/// Outcomes by job key. An entry is written once and never updated.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeStore {
    outcomes: Arc<RwLock<HashMap<String, JobOutcome>>>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `key` already has an outcome; the existing entry is kept
    pub async fn record(&self, key: &str, outcome: JobOutcome) -> bool {
        let mut outcomes = self.outcomes.write().await;
        if outcomes.contains_key(key) {
            warn!("Outcome for job {} already recorded, ignoring", key);
            return false;
        }
        outcomes.insert(key.to_string(), outcome);
        true
    }

    pub async fn get(&self, key: &str) -> Option<JobOutcome> {
        self.outcomes.read().await.get(key).cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        let outcomes = self.outcomes.read().await;
        let completed = outcomes.values().filter(|o| o.is_completed()).count();
        StoreStats {
            completed,
            failed: outcomes.len() - completed,
        }
    }
}

/// Resolves once to the outcome of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    key: String,
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn outcome(self) -> JobOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::failed(&PipelineError::worker(
                "job",
                format!("job {} ended without reporting an outcome", self.key),
            )),
        }
    }
}

/// Accepts `(key, video)` submissions and runs them through the pipeline
#[derive(Clone)]
pub struct JobRunner {
    pipeline: Arc<VideoPipeline>,
    store: KnowledgeStore,
    scratch_root: PathBuf,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        pipeline: Arc<VideoPipeline>,
        store: KnowledgeStore,
        scratch_root: PathBuf,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            pipeline,
            store,
            scratch_root,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn submit(&self, key: impl Into<String>, video_path: impl Into<PathBuf>) -> JobHandle {
        let key = key.into();
        let video_path = video_path.into();
        let (sender, receiver) = oneshot::channel();
        let runner = self.clone();
        let job_key = key.clone();

        tokio::spawn(async move {
            let outcome = runner.execute(&job_key, video_path).await;
            runner.store.record(&job_key, outcome.clone()).await;
            if sender.send(outcome).is_err() {
                debug!("Submitter of job {} is gone", job_key);
            }
        });

        JobHandle { key, receiver }
    }

    async fn execute(&self, key: &str, video_path: PathBuf) -> JobOutcome {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return JobOutcome::failed(&PipelineError::worker("job", "job runner is shut down"))
            }
        };

        let result = match Job::create(key, video_path, &self.scratch_root).await {
            Ok(job) => self.pipeline.run(&job).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(knowledge) => {
                info!("✅ Job {} completed", key);
                JobOutcome::completed(knowledge)
            }
            Err(e) => {
                error!("❌ Job {} failed: {}", key, e);
                JobOutcome::failed(&e)
            }
        }
    }
}
