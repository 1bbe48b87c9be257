pub mod error;
pub mod traits;
pub mod types;

pub use error::SchedulerError;
pub use traits::TaskDataProvider;
pub use types::{TaskExecutor, TaskFuture, TaskSchedule};
