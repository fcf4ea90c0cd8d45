//! Worker pool: bounded-concurrency consumers over the dispatch queue.

use crate::queue::dispatch::{DispatchQueue, FailOutcome};
use crate::queue::job::LeasedJob;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Opaque job-level failure. Anything that surfaces here is retried by
/// queue policy; downstream dispatcher failures never become one.
pub type ProcessError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Executed by a worker for each leased job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Run the job. An `Err` triggers a retry per the queue policy.
    async fn process(&self, job: &LeasedJob) -> Result<(), ProcessError>;

    /// Called once when a job exhausts its attempts and is dead-lettered.
    async fn on_dead_letter(&self, _job: &LeasedJob, _error: &str) {}
}

/// A fixed-size pool of consumers pulling one job each at a time.
///
/// Per-key mutual exclusion comes from the queue, not from anything the
/// workers do; two jobs with different keys run fully in parallel.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` consumer tasks. Each stops when the shutdown
    /// signal flips or the queue closes.
    pub fn spawn<P: JobProcessor>(
        queue: Arc<DispatchQueue>,
        processor: Arc<P>,
        workers: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let handles = (0..workers)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    info!(worker_id, "worker started");
                    loop {
                        tokio::select! {
                            biased;

                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    info!(worker_id, "worker received shutdown signal");
                                    break;
                                }
                            }

                            job = queue.next_job() => {
                                let Some(job) = job else {
                                    info!(worker_id, "dispatch queue closed");
                                    break;
                                };
                                Self::execute(&queue, processor.as_ref(), worker_id, job).await;
                            }
                        }
                    }
                    info!(worker_id, "worker stopped");
                })
            })
            .collect();
        Self { handles }
    }

    async fn execute<P: JobProcessor>(
        queue: &DispatchQueue,
        processor: &P,
        worker_id: usize,
        job: LeasedJob,
    ) {
        match processor.process(&job).await {
            Ok(()) => {
                queue.complete(&job.key);
            }
            Err(e) => {
                let message = e.to_string();
                match queue.fail(&job.key, &message) {
                    FailOutcome::Retry { attempt, delay } => {
                        warn!(
                            worker_id,
                            key = %job.key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "job failed, retry scheduled"
                        );
                    }
                    FailOutcome::DeadLettered { attempts } => {
                        error!(
                            worker_id,
                            key = %job.key,
                            attempts,
                            error = %message,
                            "job exhausted retries, dead-lettered"
                        );
                        processor.on_dead_letter(&job, &message).await;
                    }
                }
            }
        }
    }

    /// Wait for every worker task to finish.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{JobKey, JobPayload, RetryPolicy};
    use compact_str::CompactString;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Counting {
        processed: AtomicU32,
        fail_key: Option<JobKey>,
        dead_lettered: AtomicU32,
    }

    #[async_trait]
    impl JobProcessor for Counting {
        async fn process(&self, job: &LeasedJob) -> Result<(), ProcessError> {
            if self.fail_key.as_ref() == Some(&job.key) {
                return Err("synthetic failure".into());
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_dead_letter(&self, _job: &LeasedJob, _error: &str) {
            self.dead_lettered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn payload(reference: &str, snapshot: &str) -> JobPayload {
        JobPayload {
            source: CompactString::const_new("crm"),
            event: CompactString::const_new("created"),
            reference: reference.into(),
            snapshot: snapshot.into(),
            body: json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pool_executes_all_distinct_jobs() {
        let queue = Arc::new(DispatchQueue::new(RetryPolicy::default()));
        let processor = Arc::new(Counting {
            processed: AtomicU32::new(0),
            fail_key: None,
            dead_lettered: AtomicU32::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::spawn(Arc::clone(&queue), Arc::clone(&processor), 2, shutdown_rx);

        for reference in ["D-1", "D-2", "D-3"] {
            queue
                .enqueue(
                    JobKey::new("created", reference, "Qualified"),
                    payload(reference, "Qualified"),
                )
                .unwrap();
        }

        while queue.depth() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processor.processed.load(Ordering::SeqCst), 3);

        let _ = shutdown_tx.send(true);
        pool.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_is_retried_then_dead_lettered() {
        let queue = Arc::new(DispatchQueue::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(50),
            ..RetryPolicy::default()
        }));
        let fail_key = JobKey::new("created", "D-9", "Qualified");
        let processor = Arc::new(Counting {
            processed: AtomicU32::new(0),
            fail_key: Some(fail_key.clone()),
            dead_lettered: AtomicU32::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::spawn(Arc::clone(&queue), Arc::clone(&processor), 1, shutdown_rx);

        queue.enqueue(fail_key, payload("D-9", "Qualified")).unwrap();

        while queue.depth() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processor.dead_lettered.load(Ordering::SeqCst), 1);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 0);

        let _ = shutdown_tx.send(true);
        pool.join().await;
    }
}
