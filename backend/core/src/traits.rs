use anyhow::Result;
use async_trait::async_trait;

use crate::types::TaskSchedule;

/// Source of desired scheduling state.
///
/// A provider reports the definitions it currently considers valid and the
/// identities it has withdrawn. Several providers may be registered; the
/// reconciler merges their answers (last provider wins on a duplicate id).
/// Implementations are expected to do I/O — calls are bounded by the
/// scheduler's configured provider timeout.
#[async_trait]
pub trait TaskDataProvider: Send + Sync {
    /// All definitions this provider currently considers valid. Must not
    /// contain duplicate ids within one call.
    async fn query_all_valid_task_schedules(&self) -> Result<Vec<TaskSchedule>>;

    /// Identities this provider no longer considers valid.
    async fn query_all_invalid_task_schedule_ids(&self) -> Result<Vec<i64>>;
}
