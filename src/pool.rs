//! Fixed-size fan-out/fan-in worker pool.
//!
//! Work is split into contiguous slices, one per worker. Results are joined
//! back by slice position, never by completion order, and the first failing
//! worker fails the whole dispatch.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Split `items` into exactly `workers` contiguous slices of size `ceil(n / workers)`.
///
/// Trailing slices may be smaller or empty.
pub fn partition<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let workers = workers.max(1);
    let chunk_size = items.len().div_ceil(workers).max(1);

    let mut remaining = items.into_iter();
    (0..workers)
        .map(|_| remaining.by_ref().take(chunk_size).collect())
        .collect()
}

/// Shared flag telling workers to stop early
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raises the flag when dropped, unless disarmed after a clean join.
///
/// Covers the dispatch future being dropped mid-flight, where aborting the
/// `JoinSet` does not reach work already moved onto the blocking pool.
struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl CancelOnDrop {
    fn new(flag: CancelFlag) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

/// Per-worker handle passed to the worker function
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub id: usize,
    pub cancel: CancelFlag,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
    worker_timeout: Duration,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize, worker_timeout: Duration) -> Self {
        Self {
            name,
            workers: workers.max(1),
            worker_timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `worker` over every slice of `items` in parallel.
    ///
    /// Returns one result vector per slice, in slice order.
    pub async fn dispatch<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Result<Vec<Vec<R>>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(WorkerContext, Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<R>>> + Send + 'static,
    {
        let total = items.len();
        let slices = partition(items, self.workers);
        let cancel = CancelFlag::new();
        let mut guard = CancelOnDrop::new(cancel.clone());
        let limit = self.worker_timeout;

        debug!(
            "{} pool: dispatching {} items over {} workers",
            self.name,
            total,
            slices.len()
        );

        let mut tasks = JoinSet::new();
        for (id, slice) in slices.into_iter().enumerate() {
            let context = WorkerContext {
                id,
                cancel: cancel.clone(),
            };
            let work = AssertUnwindSafe(worker(context, slice)).catch_unwind();

            tasks.spawn(async move { (id, tokio::time::timeout(limit, work).await) });
        }

        let mut slots: Vec<Option<Vec<R>>> = (0..self.workers).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((id, Ok(Ok(Ok(output))))) => {
                    slots[id] = Some(output);
                    continue;
                }
                Ok((id, Ok(Ok(Err(e))))) => format!("worker {}: {:#}", id, e),
                Ok((id, Ok(Err(panic)))) => {
                    format!("worker {} panicked: {}", id, panic_message(panic.as_ref()))
                }
                Ok((id, Err(_))) => format!("worker {} timed out after {:?}", id, limit),
                Err(e) => format!("worker task failed: {}", e),
            };

            warn!("❌ {} pool: {}, cancelling remaining workers", self.name, failure);
            cancel.cancel();
            tasks.abort_all();
            return Err(PipelineError::worker(self.name, failure));
        }

        guard.disarm();
        slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| {
                slot.ok_or_else(|| {
                    PipelineError::worker(self.name, format!("worker {} produced no result", id))
                })
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_partition_shapes() {
        let slices = partition((0..10).collect::<Vec<_>>(), 3);
        assert_eq!(slices, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        let slices = partition((0..3).collect::<Vec<_>>(), 5);
        assert_eq!(slices.len(), 5);
        assert_eq!(slices[0], vec![0]);
        assert_eq!(slices[2], vec![2]);
        assert!(slices[3].is_empty() && slices[4].is_empty());

        let slices = partition(Vec::<u8>::new(), 4);
        assert_eq!(slices.len(), 4);
        assert!(slices.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_partition_keeps_every_item_once() {
        for workers in 1..8 {
            let flattened: Vec<i32> = partition((0..23).collect(), workers).concat();
            assert_eq!(flattened, (0..23).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_dispatch_joins_by_slot_not_arrival() {
        let pool = WorkerPool::new("test", 4, Duration::from_secs(5));

        let results = pool
            .dispatch((0..8u64).collect(), |context, slice| async move {
                // Earlier slices finish last
                let delay = 40 - 10 * context.id as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, anyhow::Error>(slice.into_iter().map(|x| x * 10).collect())
            })
            .await
            .unwrap();

        assert_eq!(results.concat(), vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn test_first_failure_fails_dispatch() {
        let pool = WorkerPool::new("ocr", 3, Duration::from_secs(5));

        let err = pool
            .dispatch((0..9).collect::<Vec<i32>>(), |context, slice| async move {
                if context.id == 1 {
                    anyhow::bail!("tesseract crashed");
                }
                Ok::<_, anyhow::Error>(slice)
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::WorkerFailure);
        assert!(err.to_string().contains("worker 1"));
        assert!(err.to_string().contains("tesseract crashed"));
    }

    #[tokio::test]
    async fn test_panic_is_worker_failure() {
        let pool = WorkerPool::new("similarity", 2, Duration::from_secs(5));

        let err = pool
            .dispatch(vec![1, 2], |context, slice| async move {
                if context.id == 0 {
                    panic!("corrupt frame");
                }
                Ok::<_, anyhow::Error>(slice)
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::WorkerFailure);
        assert!(err.to_string().contains("corrupt frame"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_siblings() {
        let pool = WorkerPool::new("similarity", 2, Duration::from_millis(50));
        let observed = CancelFlag::new();
        let witness = observed.clone();

        let err = pool
            .dispatch(vec![1, 2], move |context, slice| {
                let witness = witness.clone();
                async move {
                    if context.id == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    } else {
                        // Keep the flag observable after the pool returns
                        let cancel = context.cancel.clone();
                        tokio::spawn(async move {
                            while !cancel.is_cancelled() {
                                tokio::time::sleep(Duration::from_millis(5)).await;
                            }
                            witness.cancel();
                        });
                    }
                    Ok::<_, anyhow::Error>(slice)
                }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !observed.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_dispatch_stops_blocking_workers() {
        let pool = WorkerPool::new("similarity", 2, Duration::from_secs(30));
        let scored = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&scored);

        let dispatch = pool.dispatch((0..1000).collect::<Vec<u32>>(), move |context, slice| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::task::spawn_blocking(move || {
                    for item in &slice {
                        if context.cancel.is_cancelled() {
                            anyhow::bail!("cancelled before {}", item);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(slice)
                })
                .await?
            }
        });

        // Dropping the dispatch future stands in for a failed sibling branch
        assert!(tokio::time::timeout(Duration::from_millis(50), dispatch)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = scored.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scored.load(Ordering::SeqCst), settled);
        assert!(settled < 1000);
    }

    #[tokio::test]
    async fn test_successful_dispatch_leaves_flag_clear() {
        let pool = WorkerPool::new("ocr", 2, Duration::from_secs(5));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let flags = Arc::clone(&seen);

        pool.dispatch(vec![1, 2, 3], move |context, slice| {
            flags.lock().unwrap().push(context.cancel.clone());
            async move { Ok::<_, anyhow::Error>(slice) }
        })
        .await
        .unwrap();

        assert!(seen.lock().unwrap().iter().all(|flag| !flag.is_cancelled()));
    }
}
