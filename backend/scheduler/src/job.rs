//! Periodic driver: the timer loops that keep the scheduler reconciled.
//!
//! Two independent cadences, mirroring the service's split between
//! add/update and remove: a fixed-interval refresh loop and a cron-driven
//! invalid-task sweep loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::service::TaskJobService;
use crate::trigger::parse_schedule;

/// Drives [`TaskJobService`] on its configured cadences.
pub struct TaskJob {
    config: SchedulerConfig,
    service: Arc<TaskJobService>,
    enabled: Arc<AtomicBool>,
}

impl TaskJob {
    pub fn new(config: SchedulerConfig, service: Arc<TaskJobService>) -> Self {
        let enabled = Arc::new(AtomicBool::new(config.enabled));
        Self {
            config,
            service,
            enabled,
        }
    }

    /// Runtime switch for both loops. The loops keep ticking while disabled
    /// and resume work as soon as the flag flips back.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Spawn the refresh and sweep loops. Both exit when `shutdown` flips to
    /// true or its sender is dropped.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> (JoinHandle<()>, JoinHandle<()>) {
        info!(
            refresh_interval_ms = self.config.refresh_interval_ms,
            clean_cron = %self.config.clean_invalid_tasks_cron,
            "task job loops starting"
        );
        let refresh = tokio::spawn(Self::refresh_loop(
            self.config.clone(),
            Arc::clone(&self.service),
            Arc::clone(&self.enabled),
            shutdown.clone(),
        ));
        let clean = tokio::spawn(Self::clean_loop(
            self.config.clone(),
            Arc::clone(&self.service),
            Arc::clone(&self.enabled),
            shutdown,
        ));
        (refresh, clean)
    }

    async fn refresh_loop(
        config: SchedulerConfig,
        service: Arc<TaskJobService>,
        enabled: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = config.refresh_interval().max(Duration::from_millis(1));
        let mut ticker = time::interval(period);
        // The first tick completes immediately; initialization already ran
        // a pass, so consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !enabled.load(Ordering::Acquire) {
                        continue;
                    }
                    service.refresh_task().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("refresh loop stopped");
    }

    async fn clean_loop(
        config: SchedulerConfig,
        service: Arc<TaskJobService>,
        enabled: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let schedule = match parse_schedule(&config.clean_invalid_tasks_cron) {
            Ok(schedule) => schedule,
            Err(err) => {
                warn!(error = %err, "invalid cleanup cron expression, sweep loop disabled");
                return;
            }
        };

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = time::sleep(delay) => {
                    if !enabled.load(Ordering::Acquire) {
                        continue;
                    }
                    service.clean_invalid_task().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("sweep loop stopped");
    }
}
