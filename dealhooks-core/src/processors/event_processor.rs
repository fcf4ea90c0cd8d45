//! EventProcessor: maps a job's business state to downstream actions.
//!
//! The mapping depends on the deal status alone; `created` and `updated`
//! events share it. Dispatcher calls run concurrently and each outcome
//! is captured into a [`DispatchReport`] — a failed call is logged and
//! reported, never turned into a job-level failure. "Processed" on the
//! receipt means the mapping ran to completion, not that every
//! downstream call succeeded.

use crate::entities::ReceiptStatus;
use crate::processors::dispatchers::{DispatchError, Dispatcher, DispatcherSet};
use crate::queue::{JobProcessor, LeasedJob, ProcessError};
use crate::store::ReceiptStore;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Business status of a deal, as understood by the action mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Qualified,
    Committed,
}

impl DealStatus {
    /// Case-insensitive parse; anything unrecognized is `None` and maps
    /// to a successful no-op.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("qualified") {
            Some(DealStatus::Qualified)
        } else if raw.eq_ignore_ascii_case("committed") {
            Some(DealStatus::Committed)
        } else {
            None
        }
    }
}

/// A downstream action the mapping can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TrackConversion,
    NotifyCustomer,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::TrackConversion => "track-conversion",
            Action::NotifyCustomer => "notify-customer",
        }
    }
}

/// Ordered actions for a deal status. The event type never changes the
/// mapping, only the status does.
pub fn actions_for(status: Option<DealStatus>) -> &'static [Action] {
    match status {
        Some(DealStatus::Qualified) => &[Action::TrackConversion],
        Some(DealStatus::Committed) => &[Action::TrackConversion, Action::NotifyCustomer],
        None => &[],
    }
}

/// Per-job record of every dispatcher invocation and its outcome.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcomes: Vec<(Action, Result<(), DispatchError>)>,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.len() - self.failed()
    }
}

/// Interprets jobs pulled off the dispatch queue and owns receipt status
/// transitions after creation.
pub struct EventProcessor {
    store: Arc<dyn ReceiptStore>,
    dispatchers: DispatcherSet,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn ReceiptStore>, dispatchers: DispatcherSet) -> Self {
        Self { store, dispatchers }
    }

    fn dispatcher_for(&self, action: Action) -> &Arc<dyn Dispatcher> {
        match action {
            Action::TrackConversion => &self.dispatchers.conversion,
            Action::NotifyCustomer => &self.dispatchers.notification,
        }
    }

    /// Invoke every mapped action concurrently, containing each failure
    /// at the point of invocation.
    async fn fan_out(&self, job: &LeasedJob, actions: &[Action]) -> DispatchReport {
        let calls = actions.iter().map(|&action| {
            let dispatcher = Arc::clone(self.dispatcher_for(action));
            let payload = &job.payload;
            async move {
                let result = dispatcher.dispatch(payload).await;
                if let Err(e) = &result {
                    warn!(
                        dispatcher = dispatcher.name(),
                        key = %job.key,
                        error = %e,
                        "downstream dispatch failed"
                    );
                }
                (action, result)
            }
        });

        DispatchReport {
            outcomes: join_all(calls).await,
        }
    }
}

#[async_trait]
impl JobProcessor for EventProcessor {
    async fn process(&self, job: &LeasedJob) -> Result<(), ProcessError> {
        let status = DealStatus::parse(&job.payload.snapshot);
        let actions = actions_for(status);

        if actions.is_empty() {
            info!(
                key = %job.key,
                status = %job.payload.snapshot,
                "no action mapped for business status, treating as no-op"
            );
        } else {
            let report = self.fan_out(job, actions).await;
            info!(
                key = %job.key,
                actions = ?actions.iter().map(|a| a.label()).collect::<Vec<_>>(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "fan-out finished"
            );
        }

        self.store
            .set_status(
                &job.payload.source,
                &job.payload.reference,
                ReceiptStatus::Processed,
            )
            .await?;
        Ok(())
    }

    async fn on_dead_letter(&self, job: &LeasedJob, error: &str) {
        if let Err(e) = self
            .store
            .set_status(
                &job.payload.source,
                &job.payload.reference,
                ReceiptStatus::Failed,
            )
            .await
        {
            error!(
                key = %job.key,
                job_error = error,
                store_error = %e,
                "failed to mark receipt after dead-letter"
            );
        }
    }
}
