//! Task registry: the single source of truth for what is currently scheduled.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use sprocket_core::TaskSchedule;

use crate::trigger::TriggerHandle;

/// Registry record pairing a definition with its live trigger handle.
#[derive(Debug)]
pub struct ScheduledEntry {
    pub schedule: TaskSchedule,
    pub handle: TriggerHandle,
}

/// Point-in-time view of one registry entry, used for diffing.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub id: i64,
    pub cron_expression: String,
    pub task_param: String,
    pub handle_id: Uuid,
}

/// Concurrent map from task id to its scheduled entry.
///
/// Every mutating operation settles the displaced trigger handle inside the
/// same critical section that changes the map: an insert over an existing id
/// cancels the old handle before the new one is visible, a remove cancels
/// before the entry is dropped. A live handle therefore never exists without
/// a matching registry entry, and vice versa.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<i64, ScheduledEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time view of a single entry.
    pub async fn get(&self, id: i64) -> Option<EntrySnapshot> {
        self.entries.read().await.get(&id).map(|entry| EntrySnapshot {
            id,
            cron_expression: entry.schedule.cron_expression.clone(),
            task_param: entry.schedule.task_param.clone(),
            handle_id: entry.handle.id(),
        })
    }

    /// Install `entry` only if its id is unscheduled. When the id is already
    /// present the registry is left untouched and the rejected entry's handle
    /// is cancelled, so a lost race cannot leak a live timer.
    pub async fn insert_if_absent(&self, entry: ScheduledEntry) -> bool {
        let mut entries = self.entries.write().await;
        let id = entry.schedule.id;
        if entries.contains_key(&id) {
            entry.handle.cancel();
            return false;
        }
        entries.insert(id, entry);
        true
    }

    /// Install `entry`, replacing any current entry for the same id, unless
    /// the stored definition is already identical (same cron and param) — in
    /// that case the new handle is cancelled and nothing changes. Returns
    /// whether the entry was installed.
    pub async fn upsert_changed(&self, entry: ScheduledEntry) -> bool {
        let mut entries = self.entries.write().await;
        let id = entry.schedule.id;
        if let Some(current) = entries.get(&id) {
            if current.schedule.same_definition(&entry.schedule) {
                entry.handle.cancel();
                return false;
            }
        }
        if let Some(old) = entries.insert(id, entry) {
            old.handle.cancel();
        }
        true
    }

    /// Cancel and remove the entry for `id`. The returned entry's handle is
    /// already cancelled.
    pub async fn remove(&self, id: i64) -> Option<ScheduledEntry> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(&id);
        if let Some(entry) = &removed {
            entry.handle.cancel();
        }
        removed
    }

    /// Cancel everything and empty the registry. Returns how many entries
    /// were stopped.
    pub async fn drain(&self) -> usize {
        let mut entries = self.entries.write().await;
        let stopped = entries.len();
        for (_, entry) in entries.drain() {
            entry.handle.cancel();
        }
        stopped
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Consistent snapshot of the current definitions, keyed by id.
    pub async fn snapshot(&self) -> HashMap<i64, EntrySnapshot> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(&id, entry)| {
                (
                    id,
                    EntrySnapshot {
                        id,
                        cron_expression: entry.schedule.cron_expression.clone(),
                        task_param: entry.schedule.task_param.clone(),
                        handle_id: entry.handle.id(),
                    },
                )
            })
            .collect()
    }
}
