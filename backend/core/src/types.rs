use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Boxed future returned by a task executor for one firing.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Stored unit of work. Called with the task's id and its current parameter
/// at every firing.
pub type TaskExecutor = Arc<dyn Fn(i64, String) -> TaskFuture + Send + Sync>;

/// One schedulable unit of work: identity, cron rule, opaque parameter, and
/// the executor to run at each occurrence.
///
/// Definitions round-trip through serde without the executor (a provider
/// typically deserializes the data fields and binds the closure afterwards
/// with [`TaskSchedule::set_task`] or [`TaskSchedule::set_task_with_param`]).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSchedule {
    /// Unique identity across the registry; primary key for diffing.
    pub id: i64,
    /// Human-readable label, informational only.
    #[serde(default)]
    pub description: String,
    /// 6-field cron expression with seconds granularity (Quartz dialect,
    /// `?` accepted as "any").
    pub cron_expression: String,
    /// Opaque parameter payload, commonly JSON.
    #[serde(default)]
    pub task_param: String,
    #[serde(skip)]
    executor: Option<TaskExecutor>,
}

impl TaskSchedule {
    pub fn new(
        id: i64,
        description: impl Into<String>,
        cron_expression: impl Into<String>,
        task_param: impl Into<String>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            cron_expression: cron_expression.into(),
            task_param: task_param.into(),
            executor: None,
        }
    }

    /// Bind a parameterless unit of work.
    pub fn set_task<F, Fut>(&mut self, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.executor = Some(Arc::new(move |_id, _param| -> TaskFuture {
            Box::pin(task())
        }));
    }

    /// Bind a unit of work that receives the task id and the parameter value
    /// current at the time the trigger was installed.
    pub fn set_task_with_param<F, Fut>(&mut self, task: F)
    where
        F: Fn(i64, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.executor = Some(Arc::new(move |id, param| -> TaskFuture {
            Box::pin(task(id, param))
        }));
    }

    pub fn executor(&self) -> Option<TaskExecutor> {
        self.executor.clone()
    }

    /// Whether `other` describes the same schedule: identical cron expression
    /// and parameter. Description and executor do not participate — this is
    /// the equality the reconciler diffs on.
    pub fn same_definition(&self, other: &TaskSchedule) -> bool {
        self.cron_expression == other.cron_expression && self.task_param == other.task_param
    }
}

// The executor is opaque and would only add noise to logs.
impl fmt::Debug for TaskSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSchedule")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("cron_expression", &self.cron_expression)
            .field("task_param", &self.task_param)
            .finish()
    }
}
