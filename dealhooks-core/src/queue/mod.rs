//! Dispatch queue: deduplicated, retried, bounded-history work dispatch.
//!
//! The queue owns job identity and retry bookkeeping:
//!
//! 1. `enqueue` collapses identical submissions onto one job (coalescing)
//! 2. workers lease one job per key at a time (per-key mutual exclusion)
//! 3. a failed job backs off exponentially up to a fixed attempt ceiling
//! 4. exhausted jobs are dead-lettered and retained, with completed jobs,
//!    in a bounded history for inspection
//!
//! Jobs are ephemeral and in-process. Durability of the notification
//! itself lives in the receipt row; upstream redelivery plus idempotent
//! receipts make the pipeline at-least-once across a crash.

pub mod dispatch;
pub mod job;
pub mod worker;

pub use dispatch::{DispatchQueue, EnqueueError, EnqueueOutcome, FailOutcome};
pub use job::{JobKey, JobPayload, JobRecord, JobState, LeasedJob, RetryPolicy};
pub use worker::{JobProcessor, ProcessError, WorkerPool};
