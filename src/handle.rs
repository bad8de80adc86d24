use crate::error::SlotError;
use crate::notifier::TaskStatus;
use crate::task::ManagedTask;

use std::sync::Arc;

use tokio::sync::watch;
use tracing;

/// A handle to a task submitted to a `BoundedTaskSlot`.
///
/// Dropping the handle has no effect on the task. It exists so the producer
/// can observe what happened to its submission (including eviction) and
/// withdraw it early.
#[derive(Debug)]
pub struct TaskHandle {
  pub(crate) task: Arc<ManagedTask>,
  pub(crate) status_rx: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
  pub(crate) fn new(task: Arc<ManagedTask>) -> Self {
    let status_rx = task.subscribe();
    Self { task, status_rx }
  }

  /// Returns the slot-local ID of this task. IDs increase in submission order.
  pub fn id(&self) -> u64 {
    self.task.task_id
  }

  /// Returns the latest observed status without waiting.
  pub fn status(&self) -> TaskStatus {
    *self.status_rx.borrow()
  }

  /// Returns `true` once a worker has invoked the task's `run()`.
  ///
  /// A `Cancelled` task may or may not have run: it was either stopped while
  /// running or skipped before starting.
  pub fn run_invoked(&self) -> bool {
    self.task.run_invoked()
  }

  pub fn is_finished(&self) -> bool {
    self.status().is_terminal()
  }

  /// Checks if cancellation has been requested for this task, by the slot or via this handle.
  pub fn is_cancellation_requested(&self) -> bool {
    self.task.is_cancel_requested()
  }

  /// Requests cancellation of this specific task.
  ///
  /// A task still in the queue is skipped when it reaches the front and never
  /// runs. A running task receives `cancel()` and must cooperatively stop.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task.task_id, "TaskHandle: Cancellation requested.");
    self.task.request_cancel();
  }

  /// Waits until the task reaches a terminal status and returns it.
  ///
  /// # Errors
  /// Returns `SlotError::CompletionUnavailable` if the status channel closed
  /// before a terminal status was published.
  pub async fn await_completion(&self) -> Result<TaskStatus, SlotError> {
    let mut rx = self.status_rx.clone();
    let outcome = match rx.wait_for(TaskStatus::is_terminal).await {
      Ok(status) => Ok(*status),
      Err(recv_error) => {
        tracing::warn!(task_id = %self.task.task_id, "Status channel receive error: {}", recv_error);
        Err(SlotError::CompletionUnavailable)
      }
    };
    outcome
  }
}
