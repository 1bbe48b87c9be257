//! Clock/trigger engine: one timer loop per scheduled task, firing through a
//! bounded worker pool.
//!
//! Each registered job gets its own tokio task that sleeps until the next
//! cron occurrence and dispatches the executor. Runs are spawned separately
//! from the timer loop, so cancelling a trigger never interrupts a run
//! already in flight — it only guarantees no subsequent run starts.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::{watch, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use sprocket_core::{SchedulerError, TaskSchedule};

/// Parse and validate a cron expression.
///
/// Accepts the 6-field seconds dialect (`sec min hour dom mon dow`) and the
/// 7-field variant with a trailing year; `?` is understood as "any". An
/// expression with no upcoming occurrence (e.g. a date that never exists) is
/// rejected.
pub fn parse_schedule(expr: &str) -> Result<Schedule, SchedulerError> {
    let fields = expr.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(SchedulerError::InvalidSchedule {
            expr: expr.to_string(),
            reason: format!("expected 6 or 7 fields, got {fields}"),
        });
    }
    let schedule = Schedule::from_str(expr.trim()).map_err(|e| SchedulerError::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;
    if schedule.upcoming(Utc).next().is_none() {
        return Err(SchedulerError::InvalidSchedule {
            expr: expr.to_string(),
            reason: "no upcoming fire times".to_string(),
        });
    }
    Ok(schedule)
}

/// Cancellable reference to one scheduled, repeating cron activity.
///
/// Cancelling stops the timer loop. Cancelling twice, or after the loop has
/// already exited, is a no-op. Dropping the handle cancels implicitly — the
/// loop cannot outlive the handle that owns it.
pub struct TriggerHandle {
    id: Uuid,
    shutdown: watch::Sender<bool>,
}

impl TriggerHandle {
    /// Identity of this handle. A replaced task gets a new id, an untouched
    /// one keeps it, which is how reconcile churn is observed.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop the timer loop. Lossy by design: the loop may already be gone.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.is_closed()
    }
}

impl std::fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// Resets the per-handle busy flag when a run finishes, including on panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Schedules cron timer loops and executes fired tasks on a bounded pool.
pub struct TriggerEngine {
    pool: Arc<Semaphore>,
    pool_size: usize,
    worker_name_prefix: String,
}

impl TriggerEngine {
    pub fn new(pool_size: usize, worker_name_prefix: impl Into<String>) -> Self {
        Self {
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            worker_name_prefix: worker_name_prefix.into(),
        }
    }

    /// Register a repeating trigger for `task` and return its handle.
    ///
    /// The executor and the current parameter value are bound here, so later
    /// edits to the caller's copy of the definition do not leak into an
    /// already-installed trigger. Overlap policy is skip-if-running: a tick
    /// that finds the previous run of the same handle still executing (or
    /// still queued for a pool permit) is skipped.
    pub fn schedule(&self, task: &TaskSchedule) -> Result<TriggerHandle, SchedulerError> {
        let schedule = parse_schedule(&task.cron_expression)?;
        let executor = task
            .executor()
            .ok_or(SchedulerError::MissingExecutor(task.id))?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let pool = Arc::clone(&self.pool);
        let busy = Arc::new(AtomicBool::new(false));
        let task_id = task.id;
        let param = task.task_param.clone();
        let worker = format!("{}{}", self.worker_name_prefix, task_id);

        tokio::spawn(async move {
            // Anchoring on the last computed occurrence (rather than "now")
            // guarantees at most one fire per occurrence even if the timer
            // wakes a hair early; taking the max skips any backlog accrued
            // while a run held the loop busy.
            let mut after = Utc::now();
            loop {
                let Some(next) = schedule.after(&after).next() else {
                    debug!(task_id, "schedule has no further occurrences, loop ending");
                    break;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    // Cancellation wins a tie with a due occurrence.
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = time::sleep(delay) => {}
                }
                after = next.max(Utc::now());

                if busy.swap(true, Ordering::AcqRel) {
                    debug!(task_id, "previous run still active, skipping occurrence");
                    continue;
                }

                let run = executor(task_id, param.clone());
                let pool = Arc::clone(&pool);
                let guard = BusyGuard(Arc::clone(&busy));
                let span = info_span!("task_run", worker = %worker, task_id);
                // Spawned separately so pool exhaustion queues this run
                // without stalling the timer loop, and so cancellation
                // leaves an in-flight run alone.
                tokio::spawn(
                    async move {
                        let _guard = guard;
                        match pool.acquire_owned().await {
                            Ok(_permit) => run.await,
                            Err(_) => debug!(task_id, "worker pool closed, run dropped"),
                        }
                    }
                    .instrument(span),
                );
            }
        });

        Ok(TriggerHandle {
            id: Uuid::new_v4(),
            shutdown: shutdown_tx,
        })
    }

    /// Wait for in-flight and queued runs to finish, up to `grace`.
    ///
    /// Callers cancel their handles first; this only drains the pool.
    pub async fn shutdown(&self, grace: Duration) {
        match time::timeout(grace, self.pool.acquire_many(self.pool_size as u32)).await {
            Ok(Ok(_permits)) => debug!("worker pool drained"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "shutdown grace elapsed with task runs still in flight"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(id: i64, cron: &str) -> (TaskSchedule, Arc<AtomicUsize>) {
        let fires = Arc::new(AtomicUsize::new(0));
        let fires_clone = Arc::clone(&fires);
        let mut task = TaskSchedule::new(id, "counter", cron, "{}");
        task.set_task(move || {
            let fires = Arc::clone(&fires_clone);
            async move {
                fires.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, fires)
    }

    #[test]
    fn six_field_expression_parses() {
        assert!(parse_schedule("0/5 * * * * ?").is_ok());
        assert!(parse_schedule("0 0/10 * * * ?").is_ok());
        assert!(parse_schedule("* * * * * *").is_ok());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let err = parse_schedule("* * * * *").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert!(parse_schedule("").is_err());
        assert!(parse_schedule("* * * * * * * *").is_err());
    }

    #[test]
    fn malformed_field_is_rejected() {
        assert!(parse_schedule("x * * * * ?").is_err());
        assert!(parse_schedule("99 * * * * ?").is_err());
    }

    #[tokio::test]
    async fn trigger_fires_on_schedule() {
        let engine = TriggerEngine::new(4, "test-");
        let (task, fires) = counting_task(1, "* * * * * *");
        let handle = engine.schedule(&task).unwrap();

        time::sleep(Duration::from_millis(2500)).await;
        let fired = fires.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least 2 fires, saw {fired}");
        handle.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_future_fires_and_is_idempotent() {
        let engine = TriggerEngine::new(4, "test-");
        let (task, fires) = counting_task(2, "* * * * * *");
        let handle = engine.schedule(&task).unwrap();

        time::sleep(Duration::from_millis(1200)).await;
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        let after_cancel = fires.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn overlapping_occurrences_are_skipped() {
        let engine = TriggerEngine::new(4, "test-");
        let starts = Arc::new(AtomicUsize::new(0));
        let starts_clone = Arc::clone(&starts);
        let mut task = TaskSchedule::new(3, "slow", "* * * * * *", "{}");
        task.set_task(move || {
            let starts = Arc::clone(&starts_clone);
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_secs(5)).await;
            }
        });
        let handle = engine.schedule(&task).unwrap();

        // Several occurrences elapse while the first run is still sleeping.
        time::sleep(Duration::from_millis(3200)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        handle.cancel();
    }

    #[tokio::test]
    async fn missing_executor_is_rejected() {
        let engine = TriggerEngine::new(4, "test-");
        let task = TaskSchedule::new(4, "no executor", "* * * * * *", "{}");
        let err = engine.schedule(&task).unwrap_err();
        assert!(matches!(err, SchedulerError::MissingExecutor(4)));
    }

    #[tokio::test]
    async fn invalid_expression_never_spawns() {
        let engine = TriggerEngine::new(4, "test-");
        let (task, fires) = counting_task(5, "not a cron");
        assert!(engine.schedule(&task).is_err());
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
