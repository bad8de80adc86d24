use std::time::Duration;

use thiserror::Error;

/// Errors that can occur within a `BoundedTaskSlot`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
  #[error("Task slot capacity must be at least 1, got {0}")]
  InvalidCapacity(usize),

  #[error("Task slot max_task_runtime {0:?} exceeds the supported limit")]
  InvalidMaxTaskRuntime(Duration),

  #[error("Failed to spawn task slot thread: {0}")]
  ThreadSpawn(String),

  #[error("Task slot is disposed, cannot accept new tasks")]
  Disposed,

  #[error("Task {task_id} did not exit within the {grace:?} grace period after cancellation; its worker was detached")]
  DisposeTimeout { task_id: u64, grace: Duration },

  #[error("Task status channel closed before the task reached a terminal status")]
  CompletionUnavailable,
}

impl SlotError {
  /// Returns a short stable label for use in logs.
  pub fn as_label(&self) -> &'static str {
    match self {
      SlotError::InvalidCapacity(_) => "slot_invalid_capacity",
      SlotError::InvalidMaxTaskRuntime(_) => "slot_invalid_max_task_runtime",
      SlotError::ThreadSpawn(_) => "slot_thread_spawn",
      SlotError::Disposed => "slot_disposed",
      SlotError::DisposeTimeout { .. } => "slot_dispose_timeout",
      SlotError::CompletionUnavailable => "slot_completion_unavailable",
    }
  }
}
