//! Construction-time settings for a [`BoundedTaskSlot`](crate::BoundedTaskSlot).
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use task_slot::SlotConfig;
//!
//! let cfg = SlotConfig::default()
//!   .with_name("preview")
//!   .with_capacity(3)
//!   .with_max_task_runtime(Duration::from_secs(5));
//!
//! assert_eq!(cfg.capacity, 3);
//! assert!(cfg.validate().is_ok());
//! ```

use crate::error::SlotError;

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

lazy_static::lazy_static! {
  static ref NEXT_SLOT_NAME_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Default grace period `dispose` waits for a cancelled task to exit.
pub const DEFAULT_MAX_TASK_RUNTIME: Duration = Duration::from_secs(60);

/// Largest accepted `max_task_runtime`. `dispose` must always return, so the
/// grace period has to stay representable as a deadline.
pub const MAX_TASK_RUNTIME_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for a single task slot.
#[derive(Clone, Debug)]
pub struct SlotConfig {
  /// Name used in thread names and log fields.
  pub name: String,
  /// Maximum number of pending (not yet started) tasks. Must be at least 1.
  pub capacity: usize,
  /// Upper bound on how long `dispose` waits for the running task to exit.
  /// At most [`MAX_TASK_RUNTIME_LIMIT`].
  pub max_task_runtime: Duration,
}

impl Default for SlotConfig {
  /// - `name = "task-slot-<n>"`, unique within the process
  /// - `capacity = 1`
  /// - `max_task_runtime = 60s`
  fn default() -> Self {
    let n = NEXT_SLOT_NAME_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    Self {
      name: format!("task-slot-{}", n),
      capacity: 1,
      max_task_runtime: DEFAULT_MAX_TASK_RUNTIME,
    }
  }
}

impl SlotConfig {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  pub fn with_max_task_runtime(mut self, max_task_runtime: Duration) -> Self {
    self.max_task_runtime = max_task_runtime;
    self
  }

  /// Checks the configuration before any thread is started.
  pub fn validate(&self) -> Result<(), SlotError> {
    if self.capacity < 1 {
      return Err(SlotError::InvalidCapacity(self.capacity));
    }
    if self.max_task_runtime > MAX_TASK_RUNTIME_LIMIT {
      return Err(SlotError::InvalidMaxTaskRuntime(self.max_task_runtime));
    }
    Ok(())
  }
}
