//! Job identity, payload, and retry policy.

use compact_str::CompactString;
use serde::Serialize;
use std::time::Duration;

/// Backoff exponent cap; keeps the delay bounded however high the
/// attempt ceiling is configured.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Deterministic job identity.
///
/// Derived from the event tag, the reference, and the business-state
/// snapshot taken at enqueue time. Never derived from wall-clock time or
/// randomness, so repeated deliveries of an unchanged notification
/// collapse onto the same job, while a later state transition for the
/// same reference forms an independent one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub event: CompactString,
    pub reference: CompactString,
    pub snapshot: CompactString,
}

impl JobKey {
    pub fn new(
        event: impl Into<CompactString>,
        reference: impl Into<CompactString>,
        snapshot: impl Into<CompactString>,
    ) -> Self {
        Self {
            event: event.into(),
            reference: reference.into(),
            snapshot: snapshot.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.event, self.reference, self.snapshot)
    }
}

/// Forwarded event body plus the identifiers the worker needs.
///
/// `snapshot` is the business status captured at enqueue time; the
/// processor reads it from here rather than re-deriving it mid-flight.
#[derive(Debug, Clone)]
pub struct JobPayload {
    pub source: CompactString,
    pub event: CompactString,
    pub reference: CompactString,
    pub snapshot: CompactString,
    pub body: serde_json::Value,
}

/// A job handed to a worker. The lease is exclusive: the queue will not
/// hand out the same key again until this attempt settles.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub key: JobKey,
    pub payload: JobPayload,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Externally visible lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Backoff,
    Completed,
    DeadLettered,
}

/// Inspection snapshot of one job (see the admin queue endpoint).
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub key: String,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Retry and retention knobs for the dispatch queue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per subsequent attempt.
    pub base_delay: Duration,
    /// How long a completed or dead-lettered key keeps absorbing
    /// re-submissions before a fresh job is accepted.
    pub retention: Duration,
    /// Maximum number of finished jobs retained for inspection.
    pub history_cap: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            retention: Duration::from_secs(900),
            history_cap: 256,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given failed attempt (1-based):
    /// `base_delay * 2^(attempt-1)`, exponent capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay * 2u32.pow(exponent)
    }
}
