//! The dispatch queue itself.
//!
//! One `JobEntry` per key, moved through `Queued -> Running -> {Completed,
//! Backoff -> Queued ..., Dead}`. All bookkeeping lives behind one mutex;
//! nothing is awaited while it is held.

use crate::queue::job::{JobKey, JobPayload, JobRecord, JobState, LeasedJob, RetryPolicy};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was created for this key.
    Enqueued,
    /// An equivalent job already exists (queued, in flight, backing off,
    /// or finished within the retention window); the call was a no-op.
    Coalesced,
}

/// Errors from enqueue.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue has been closed for shutdown.
    #[error("dispatch queue is closed")]
    Closed,
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will run again after the given backoff.
    Retry { attempt: u32, delay: Duration },
    /// The attempt ceiling is exhausted; the job is dead-lettered.
    DeadLettered { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Queued,
    Running,
    Backoff { due: Instant },
    Completed { at: Instant },
    Dead { at: Instant },
}

struct JobEntry {
    payload: JobPayload,
    attempts: u32,
    phase: Phase,
    last_error: Option<String>,
}

struct DelayedEntry {
    due: Instant,
    seq: u64,
    key: JobKey,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for DelayedEntry {}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct QueueInner {
    jobs: HashMap<JobKey, JobEntry>,
    ready: VecDeque<JobKey>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    /// Completed and dead-lettered keys in finish order, for eviction.
    finished: VecDeque<JobKey>,
    seq: u64,
    closed: bool,
}

/// Deduplicating work queue with bounded retries and bounded history.
pub struct DispatchQueue {
    policy: RetryPolicy,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                ready: VecDeque::new(),
                delayed: BinaryHeap::new(),
                finished: VecDeque::new(),
                seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Submit work for `key`. Identical concurrent submissions collapse
    /// onto the existing job; a key that finished within the retention
    /// window keeps absorbing submissions until the window elapses.
    pub fn enqueue(
        &self,
        key: JobKey,
        payload: JobPayload,
    ) -> Result<EnqueueOutcome, EnqueueError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }

        if let Some(entry) = inner.jobs.get(&key) {
            match entry.phase {
                Phase::Queued | Phase::Running | Phase::Backoff { .. } => {
                    debug!(key = %key, "enqueue coalesced onto live job");
                    return Ok(EnqueueOutcome::Coalesced);
                }
                Phase::Completed { at } | Phase::Dead { at } => {
                    if at.elapsed() < self.policy.retention {
                        debug!(key = %key, "enqueue coalesced onto retained job");
                        return Ok(EnqueueOutcome::Coalesced);
                    }
                    // Retention elapsed: forget the old record, accept fresh.
                    inner.finished.retain(|k| k != &key);
                    inner.jobs.remove(&key);
                }
            }
        }

        inner.jobs.insert(
            key.clone(),
            JobEntry {
                payload,
                attempts: 0,
                phase: Phase::Queued,
                last_error: None,
            },
        );
        inner.ready.push_back(key);
        drop(inner);
        self.notify.notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    /// Lease the next runnable job, waiting for one to become ready.
    ///
    /// Returns `None` once the queue is closed and nothing is immediately
    /// runnable. Callers running inside a worker loop should still combine
    /// this with their own shutdown signal.
    pub async fn next_job(&self) -> Option<LeasedJob> {
        loop {
            let wait_until;
            {
                let mut inner = self.lock();
                Self::promote_due(&mut inner);

                if let Some(key) = inner.ready.pop_front() {
                    if let Some(entry) = inner.jobs.get_mut(&key) {
                        entry.attempts += 1;
                        entry.phase = Phase::Running;
                        return Some(LeasedJob {
                            key: key.clone(),
                            payload: entry.payload.clone(),
                            attempt: entry.attempts,
                        });
                    }
                    // Ready key without an entry is a bookkeeping bug;
                    // skip it rather than stall the worker.
                    warn!(key = %key, "ready job had no entry");
                    continue;
                }

                if inner.closed {
                    return None;
                }
                wait_until = inner.delayed.peek().map(|Reverse(e)| e.due);
            }

            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark a leased job as successfully completed.
    pub fn complete(&self, key: &JobKey) {
        let mut inner = self.lock();
        if let Some(entry) = inner.jobs.get_mut(key) {
            entry.phase = Phase::Completed {
                at: Instant::now(),
            };
            inner.finished.push_back(key.clone());
            self.evict_over_cap(&mut inner);
        }
    }

    /// Report a failed attempt for a leased job. Either schedules a
    /// backoff retry or dead-letters the job once attempts are exhausted.
    pub fn fail(&self, key: &JobKey, error: &str) -> FailOutcome {
        let mut inner = self.lock();
        let Some(entry) = inner.jobs.get_mut(key) else {
            warn!(key = %key, "failure reported for unknown job");
            return FailOutcome::DeadLettered { attempts: 0 };
        };
        entry.last_error = Some(error.to_string());
        let attempts = entry.attempts;

        if attempts >= self.policy.max_attempts {
            entry.phase = Phase::Dead {
                at: Instant::now(),
            };
            inner.finished.push_back(key.clone());
            self.evict_over_cap(&mut inner);
            return FailOutcome::DeadLettered { attempts };
        }

        let delay = self.policy.retry_delay(attempts);
        let due = Instant::now() + delay;
        entry.phase = Phase::Backoff { due };
        inner.seq += 1;
        let seq = inner.seq;
        inner.delayed.push(Reverse(DelayedEntry {
            due,
            seq,
            key: key.clone(),
        }));
        drop(inner);
        // Wake a sleeping worker so it re-arms its timer against the new
        // earliest deadline.
        self.notify.notify_one();
        FailOutcome::Retry {
            attempt: attempts,
            delay,
        }
    }

    /// Number of jobs that still have work ahead of them (queued,
    /// running, or backing off).
    pub fn depth(&self) -> usize {
        let inner = self.lock();
        inner
            .jobs
            .values()
            .filter(|e| {
                matches!(
                    e.phase,
                    Phase::Queued | Phase::Running | Phase::Backoff { .. }
                )
            })
            .count()
    }

    /// Inspection snapshot of every tracked job, live and retained.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let inner = self.lock();
        let mut records: Vec<JobRecord> = inner
            .jobs
            .iter()
            .map(|(key, entry)| JobRecord {
                key: key.to_string(),
                state: match entry.phase {
                    Phase::Queued => JobState::Queued,
                    Phase::Running => JobState::Running,
                    Phase::Backoff { .. } => JobState::Backoff,
                    Phase::Completed { .. } => JobState::Completed,
                    Phase::Dead { .. } => JobState::DeadLettered,
                },
                attempts: entry.attempts,
                last_error: entry.last_error.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Close the queue: further enqueues fail and idle `next_job` calls
    /// return `None`.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn promote_due(inner: &mut QueueInner) {
        let now = Instant::now();
        while let Some(Reverse(head)) = inner.delayed.peek() {
            if head.due > now {
                break;
            }
            let Some(Reverse(entry)) = inner.delayed.pop() else {
                break;
            };
            if let Some(job) = inner.jobs.get_mut(&entry.key) {
                if matches!(job.phase, Phase::Backoff { due } if due == entry.due) {
                    job.phase = Phase::Queued;
                    inner.ready.push_back(entry.key);
                }
            }
        }
    }

    fn evict_over_cap(&self, inner: &mut QueueInner) {
        while inner.finished.len() > self.policy.history_cap {
            if let Some(oldest) = inner.finished.pop_front() {
                inner.jobs.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;
    use serde_json::json;

    fn payload(reference: &str, snapshot: &str) -> JobPayload {
        JobPayload {
            source: CompactString::const_new("crm"),
            event: CompactString::const_new("created"),
            reference: reference.into(),
            snapshot: snapshot.into(),
            body: json!({"deal": {"reference": reference, "status": snapshot}}),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            retention: Duration::from_secs(60),
            history_cap: 8,
        }
    }

    #[tokio::test]
    async fn identical_keys_coalesce() {
        let queue = DispatchQueue::new(policy());
        let key = JobKey::new("created", "D-1", "Qualified");

        let first = queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();
        let second = queue.enqueue(key, payload("D-1", "Qualified")).unwrap();

        assert_eq!(first, EnqueueOutcome::Enqueued);
        assert_eq!(second, EnqueueOutcome::Coalesced);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn distinct_snapshots_are_independent_jobs() {
        let queue = DispatchQueue::new(policy());
        queue
            .enqueue(
                JobKey::new("created", "D-1", "Qualified"),
                payload("D-1", "Qualified"),
            )
            .unwrap();
        queue
            .enqueue(
                JobKey::new("updated", "D-1", "Committed"),
                payload("D-1", "Committed"),
            )
            .unwrap();
        assert_eq!(queue.depth(), 2);

        let first = queue.next_job().await.unwrap();
        let second = queue.next_job().await.unwrap();
        assert_ne!(first.key, second.key);
    }

    #[tokio::test]
    async fn running_job_key_is_exclusive() {
        let queue = DispatchQueue::new(policy());
        let key = JobKey::new("created", "D-1", "Qualified");
        queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();

        let leased = queue.next_job().await.unwrap();
        assert_eq!(leased.attempt, 1);

        // While the job is running, the same key coalesces and no second
        // lease is available.
        let outcome = queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();
        assert_eq!(outcome, EnqueueOutcome::Coalesced);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_then_dead_letter() {
        let queue = DispatchQueue::new(policy());
        let key = JobKey::new("created", "D-1", "Qualified");
        queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();

        let mut delays = Vec::new();
        let mut leases = 0u32;
        loop {
            let job = queue.next_job().await.unwrap();
            leases += 1;
            assert_eq!(job.attempt, leases);
            match queue.fail(&job.key, "boom") {
                FailOutcome::Retry { delay, .. } => delays.push(delay),
                FailOutcome::DeadLettered { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
            }
        }

        assert_eq!(leases, 3);
        assert_eq!(delays.len(), 2);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));

        let records = queue.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, JobState::DeadLettered);
        assert_eq!(records[0].last_error.as_deref(), Some("boom"));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_dedup_within_retention_window() {
        let queue = DispatchQueue::new(policy());
        let key = JobKey::new("created", "D-1", "Qualified");
        queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();

        let job = queue.next_job().await.unwrap();
        queue.complete(&job.key);

        // Inside the window the completed record still absorbs the key.
        let outcome = queue.enqueue(key.clone(), payload("D-1", "Qualified")).unwrap();
        assert_eq!(outcome, EnqueueOutcome::Coalesced);

        tokio::time::advance(Duration::from_secs(61)).await;

        let outcome = queue.enqueue(key, payload("D-1", "Qualified")).unwrap();
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn history_is_evicted_over_cap() {
        let queue = DispatchQueue::new(RetryPolicy {
            history_cap: 2,
            ..policy()
        });

        for reference in ["D-1", "D-2", "D-3"] {
            let key = JobKey::new("created", reference, "Qualified");
            queue.enqueue(key, payload(reference, "Qualified")).unwrap();
            let job = queue.next_job().await.unwrap();
            queue.complete(&job.key);
        }

        let records = queue.snapshot();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.state == JobState::Completed));
        assert!(!records.iter().any(|r| r.key.contains("D-1")));
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let queue = DispatchQueue::new(policy());
        queue.close();
        let err = queue
            .enqueue(
                JobKey::new("created", "D-1", "Qualified"),
                payload("D-1", "Qualified"),
            )
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Closed));
        assert!(queue.next_job().await.is_none());
    }
}
