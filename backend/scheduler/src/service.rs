//! Lifecycle controller: reconciliation, invalid-task sweeping, and direct
//! task management over the registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time;
use tracing::{debug, info, warn};

use sprocket_core::{SchedulerError, TaskDataProvider, TaskSchedule};

use crate::config::SchedulerConfig;
use crate::registry::{ScheduledEntry, TaskRegistry};
use crate::trigger::{parse_schedule, TriggerEngine};

/// Dynamic task scheduling service.
///
/// Owns the registry and the trigger engine, and brings the registry into
/// agreement with the desired state reported by the registered providers.
/// Refresh and clean passes are best-effort: provider failures are absorbed
/// and logged, never surfaced to the caller.
pub struct TaskJobService {
    config: SchedulerConfig,
    engine: TriggerEngine,
    registry: TaskRegistry,
    providers: Vec<Arc<dyn TaskDataProvider>>,
}

impl TaskJobService {
    pub fn new(config: SchedulerConfig, providers: Vec<Arc<dyn TaskDataProvider>>) -> Self {
        let engine = TriggerEngine::new(config.pool_size, config.worker_name_prefix.clone());
        info!(
            pool_size = config.pool_size,
            providers = providers.len(),
            "trigger engine initialized"
        );
        Self {
            config,
            engine,
            registry: TaskRegistry::new(),
            providers,
        }
    }

    /// Run one reconcile pass so the registry is populated before the host
    /// starts serving. Failures are logged inside the pass; calling this
    /// twice behaves like a normal refresh.
    pub async fn initialize_tasks(&self) {
        self.refresh_task().await;
        info!(
            active = self.active_task_count().await,
            "task schedules initialized"
        );
    }

    /// Schedule a task directly.
    ///
    /// Returns `Ok(false)` without side effects when the id is already
    /// scheduled. A malformed cron expression or a definition without an
    /// executor is an error, also without side effects.
    pub async fn add_task(&self, task: TaskSchedule) -> Result<bool, SchedulerError> {
        parse_schedule(&task.cron_expression)?;
        if task.executor().is_none() {
            return Err(SchedulerError::MissingExecutor(task.id));
        }
        if self.registry.get(task.id).await.is_some() {
            debug!(task_id = task.id, "add rejected, id already scheduled");
            return Ok(false);
        }

        let task_id = task.id;
        let handle = self.engine.schedule(&task)?;
        let installed = self
            .registry
            .insert_if_absent(ScheduledEntry {
                schedule: task,
                handle,
            })
            .await;
        if installed {
            debug!(task_id, "task scheduled");
        }
        Ok(installed)
    }

    /// Cancel and remove a task. Returns whether it was scheduled.
    pub async fn remove_task(&self, id: i64) -> bool {
        match self.registry.remove(id).await {
            Some(_) => {
                debug!(task_id = id, "task removed");
                true
            }
            None => false,
        }
    }

    /// One reconcile pass: fetch the desired state from every provider and
    /// apply additions and updates to the registry.
    ///
    /// Entries absent from the desired set are deliberately left alone —
    /// removal belongs to [`TaskJobService::clean_invalid_task`] and
    /// [`TaskJobService::remove_task`], which run on their own cadence.
    pub async fn refresh_task(&self) {
        let desired = self.fetch_valid().await;
        let current = self.registry.snapshot().await;

        let mut added = 0usize;
        let mut replaced = 0usize;
        for (id, task) in desired {
            let existing = current.get(&id);
            if let Some(snap) = existing {
                if snap.cron_expression == task.cron_expression
                    && snap.task_param == task.task_param
                {
                    continue;
                }
            }

            match self.engine.schedule(&task) {
                Ok(handle) => {
                    let installed = self
                        .registry
                        .upsert_changed(ScheduledEntry {
                            schedule: task,
                            handle,
                        })
                        .await;
                    if installed {
                        if existing.is_some() {
                            replaced += 1;
                            debug!(task_id = id, "task rescheduled with new definition");
                        } else {
                            added += 1;
                            debug!(task_id = id, "task scheduled");
                        }
                    }
                }
                Err(err) => {
                    warn!(task_id = id, error = %err, "skipping unschedulable task definition");
                }
            }
        }

        if added > 0 || replaced > 0 {
            info!(added, replaced, "task schedules refreshed");
        }
    }

    /// One sweep pass: remove every registered task a provider now reports
    /// as invalid. Ids that were never scheduled are ignored.
    pub async fn clean_invalid_task(&self) {
        let invalid = self.fetch_invalid().await;

        let mut removed = 0usize;
        for id in invalid {
            if self.registry.remove(id).await.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "invalid task schedules cleaned");
        }
    }

    /// Cancel every trigger and empty the registry. Later `add_task` or
    /// `refresh_task` calls may repopulate it.
    pub async fn stop_all_task(&self) {
        let stopped = self.registry.drain().await;
        info!(stopped, "all task schedules stopped");
    }

    /// Point-in-time number of scheduled tasks.
    pub async fn active_task_count(&self) -> usize {
        self.registry.len().await
    }

    /// Stop all tasks, then wait for in-flight runs per the configured
    /// shutdown policy.
    pub async fn shutdown(&self) {
        self.stop_all_task().await;
        if self.config.wait_for_tasks_on_shutdown {
            self.engine.shutdown(self.config.await_termination()).await;
        }
    }

    /// Merged desired state. Providers are consulted in registration order;
    /// on a duplicate id the last provider wins. A provider that fails or
    /// exceeds the timeout contributes nothing to this pass.
    async fn fetch_valid(&self) -> HashMap<i64, TaskSchedule> {
        let timeout = self.config.provider_timeout();
        let mut desired = HashMap::new();
        for (idx, provider) in self.providers.iter().enumerate() {
            match time::timeout(timeout, provider.query_all_valid_task_schedules()).await {
                Ok(Ok(tasks)) => {
                    for task in tasks {
                        desired.insert(task.id, task);
                    }
                }
                Ok(Err(err)) => {
                    warn!(provider = idx, error = %err, "valid-task fetch failed, treated as empty for this pass");
                }
                Err(_) => {
                    warn!(
                        provider = idx,
                        timeout_ms = self.config.provider_timeout_ms,
                        "valid-task fetch timed out, treated as empty for this pass"
                    );
                }
            }
        }
        desired
    }

    /// Union of invalid ids across providers, same failure policy as
    /// [`TaskJobService::fetch_valid`].
    async fn fetch_invalid(&self) -> HashSet<i64> {
        let timeout = self.config.provider_timeout();
        let mut invalid = HashSet::new();
        for (idx, provider) in self.providers.iter().enumerate() {
            match time::timeout(timeout, provider.query_all_invalid_task_schedule_ids()).await {
                Ok(Ok(ids)) => invalid.extend(ids),
                Ok(Err(err)) => {
                    warn!(provider = idx, error = %err, "invalid-id fetch failed, treated as empty for this pass");
                }
                Err(_) => {
                    warn!(
                        provider = idx,
                        timeout_ms = self.config.provider_timeout_ms,
                        "invalid-id fetch timed out, treated as empty for this pass"
                    );
                }
            }
        }
        invalid
    }
}
