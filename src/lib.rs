//! A bounded, single-worker task slot that serializes cancellable background
//! jobs, evicts stale pending work, and lets the latest submission preempt
//! whatever is running.

mod config;
mod error;
mod handle;
mod notifier;
mod slot;
mod task;
mod task_queue;

pub use config::{SlotConfig, DEFAULT_MAX_TASK_RUNTIME, MAX_TASK_RUNTIME_LIMIT};
pub use error::SlotError;
pub use handle::TaskHandle;
pub use notifier::{TaskCompletionInfo, TaskStatus};
pub use slot::BoundedTaskSlot;
pub use task::{CancellableTask, TaskFn};
pub use tokio_util::sync::CancellationToken;
