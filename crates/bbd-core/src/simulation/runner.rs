//! Execution of embarrassingly-parallel iteration batches.
//!
//! Two runners behind one enum: in-process sequential (always available, the
//! default for hosts that cannot spawn OS threads) and a rayon pool with
//! deterministic chunking. Because every iteration owns a PRNG substream
//! keyed on `(master_seed, iteration)`, scheduling never perturbs results;
//! the output order is imposed by iteration index, not completion order.

#[cfg(feature = "parallel")]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BbdError;
use crate::BbdResult;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ---------------------------------------------------------------------------
// Cancellation and progress
// ---------------------------------------------------------------------------

/// Cooperative cancellation token, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Orchestration hooks for a run. All optional.
#[derive(Clone, Default)]
pub struct SimulationHooks {
    pub on_progress: Option<ProgressFn>,
    pub cancel: Option<CancelToken>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunner {
    SingleThread,
    #[cfg(feature = "parallel")]
    ThreadPool,
}

impl TaskRunner {
    /// Pick the pool when compiled in and the batch is worth the fan-out.
    pub fn auto(iterations: usize) -> Self {
        #[cfg(feature = "parallel")]
        if iterations > 1 {
            return TaskRunner::ThreadPool;
        }
        let _ = iterations;
        TaskRunner::SingleThread
    }

    /// Run `job` for every iteration index in `[0, total)`, returning results
    /// in iteration order. `progress_stride` throttles callback frequency.
    pub fn run<T, F>(
        &self,
        total: usize,
        progress_stride: usize,
        hooks: &SimulationHooks,
        job: F,
    ) -> BbdResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> BbdResult<T> + Sync,
    {
        let stride = progress_stride.max(1);
        match self {
            TaskRunner::SingleThread => {
                let mut results = Vec::with_capacity(total);
                for i in 0..total {
                    if cancelled(hooks) {
                        return Err(BbdError::Cancelled {
                            completed_iterations: i,
                        });
                    }
                    results.push(job(i)?);
                    if (i + 1) % stride == 0 || i + 1 == total {
                        report(hooks, i + 1, total);
                    }
                }
                Ok(results)
            }
            #[cfg(feature = "parallel")]
            TaskRunner::ThreadPool => {
                let workers = total.min(num_cpus::get().max(1));
                let chunk_size = total.div_ceil(workers);
                let completed = AtomicUsize::new(0);

                let chunks: Vec<BbdResult<Vec<T>>> = (0..workers)
                    .into_par_iter()
                    .map(|w| {
                        let start = w * chunk_size;
                        let end = ((w + 1) * chunk_size).min(total);
                        let mut out = Vec::with_capacity(end.saturating_sub(start));
                        for i in start..end {
                            if cancelled(hooks) {
                                return Err(BbdError::Cancelled {
                                    completed_iterations: completed.load(Ordering::SeqCst),
                                });
                            }
                            out.push(job(i)?);
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            if done % stride == 0 || done == total {
                                report(hooks, done, total);
                            }
                        }
                        Ok(out)
                    })
                    .collect();

                // Merge in worker order, which is iteration order by
                // construction of the chunking.
                let mut results = Vec::with_capacity(total);
                for chunk in chunks {
                    results.extend(chunk?);
                }
                Ok(results)
            }
        }
    }
}

fn cancelled(hooks: &SimulationHooks) -> bool {
    hooks
        .cancel
        .as_ref()
        .map(CancelToken::is_cancelled)
        .unwrap_or(false)
}

fn report(hooks: &SimulationHooks, completed: usize, total: usize) {
    if let Some(cb) = &hooks.on_progress {
        cb(Progress { completed, total });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_single_thread_preserves_order() {
        let runner = TaskRunner::SingleThread;
        let results = runner
            .run(100, 10, &SimulationHooks::default(), |i| Ok(i * 2))
            .unwrap();
        assert_eq!(results.len(), 100);
        assert_eq!(results[17], 34);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_thread_pool_matches_single_thread() {
        let hooks = SimulationHooks::default();
        let sequential = TaskRunner::SingleThread
            .run(512, 64, &hooks, |i| Ok(i * i))
            .unwrap();
        let pooled = TaskRunner::ThreadPool
            .run(512, 64, &hooks, |i| Ok(i * i))
            .unwrap();
        assert_eq!(sequential, pooled);
    }

    #[test]
    fn test_cancel_before_start_returns_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let hooks = SimulationHooks {
            on_progress: None,
            cancel: Some(token),
        };
        let err = TaskRunner::SingleThread
            .run(10, 1, &hooks, |i| Ok(i))
            .unwrap_err();
        assert!(matches!(
            err,
            BbdError::Cancelled {
                completed_iterations: 0
            }
        ));
    }

    #[test]
    fn test_mid_run_cancellation_reports_completed_count() {
        let token = CancelToken::new();
        let hooks = SimulationHooks {
            on_progress: None,
            cancel: Some(token.clone()),
        };
        let err = TaskRunner::SingleThread
            .run(100, 1, &hooks, |i| {
                if i == 4 {
                    token.cancel();
                }
                Ok(i)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BbdError::Cancelled {
                completed_iterations: 5
            }
        ));
    }

    #[test]
    fn test_progress_is_throttled_and_reaches_total() {
        let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks = SimulationHooks {
            on_progress: Some(Arc::new(move |p| sink.lock().unwrap().push(p))),
            cancel: None,
        };
        TaskRunner::SingleThread
            .run(100, 25, &hooks, |i| Ok(i))
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen.last(),
            Some(&Progress {
                completed: 100,
                total: 100
            })
        );
    }
}
