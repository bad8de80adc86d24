use crate::error::SlotError;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, trace};

// --- Public Event Types for Handlers ---

/// Observable lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
  /// Queued, not started.
  Pending,
  /// Executing on the slot's worker thread.
  Running,
  /// `run()` returned and no cancellation was requested.
  Completed,
  /// Cancellation was requested and the task either returned or was skipped before starting.
  Cancelled,
  /// `run()` panicked, or the worker thread could not be spawned.
  Panicked,
  /// Dropped from a full queue without running.
  Evicted,
  /// Still pending when the slot was disposed. Never ran.
  Discarded,
}

impl TaskStatus {
  /// Returns `true` for statuses a task never leaves.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, TaskStatus::Pending | TaskStatus::Running)
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub slot_name: Arc<String>,
  pub status: TaskStatus,
  /// Whether a worker invoked the task's `run()`. `Cancelled` does not say.
  pub run_invoked: bool,
  pub completion_time: SystemTime,
}

// --- Internal Message (crate-public) ---
#[derive(Debug)]
pub(crate) struct InternalCompletionMessage {
  pub(crate) task_id: u64,
  pub(crate) status: TaskStatus,
  pub(crate) run_invoked: bool,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

// --- CompletionNotifier ---

/// Fans terminal task statuses out to registered handlers.
///
/// The dispatch thread is started lazily with the first handler. Messages are
/// handed over through an unbounded channel so that reporting never blocks the
/// control loop or a worker, and handlers never run while the slot lock is held.
/// The thread is detached; it exits once the notifier is dropped and the
/// channel drains.
pub(crate) struct CompletionNotifier {
  slot_name: Arc<String>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  tx: Mutex<Option<mpsc::UnboundedSender<InternalCompletionMessage>>>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("slot_name", &self.slot_name)
      .field("handler_count", &handler_count)
      .field("initialized", &self.tx.lock().is_some())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(slot_name: Arc<String>) -> Self {
    Self {
      slot_name,
      handlers: Arc::new(RwLock::new(Vec::new())),
      tx: Mutex::new(None),
    }
  }

  pub(crate) fn add_handler(
    &self,
    handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static,
  ) -> Result<(), SlotError> {
    self.ensure_worker_initialized()?;

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(slot_name = %*self.slot_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
    Ok(())
  }

  pub(crate) fn handler_count(&self) -> usize {
    self.handlers.read().len()
  }

  /// Queues a terminal status for dispatch. A no-op until a handler exists.
  pub(crate) fn notify(&self, task_id: u64, status: TaskStatus, run_invoked: bool) {
    let tx_guard = self.tx.lock();
    match tx_guard.as_ref() {
      Some(tx) => {
        let message = InternalCompletionMessage {
          task_id,
          status,
          run_invoked,
        };
        if tx.send(message).is_err() {
          debug!(slot_name = %*self.slot_name, %task_id, "Notifier: dispatch thread is gone, dropping notification.");
        }
      }
      None => {
        trace!(slot_name = %*self.slot_name, %task_id, "No completion handlers registered, dropping notification.");
      }
    }
  }

  fn ensure_worker_initialized(&self) -> Result<(), SlotError> {
    let mut tx_guard = self.tx.lock();
    if tx_guard.is_some() {
      return Ok(());
    }

    info!(slot_name = %*self.slot_name, "First completion handler added. Initializing notification thread.");
    let (tx, rx) = mpsc::unbounded_channel();
    let worker_handlers = self.handlers.clone();
    let worker_slot_name = self.slot_name.clone();

    // The handle is dropped right away: nothing joins this thread, and the
    // last slot reference may be released from a worker or from a handler.
    let _detached = thread::Builder::new()
      .name(format!("{}-notifier", self.slot_name))
      .spawn(move || {
        let span = info_span!("task_slot_notifier", slot_name = %*worker_slot_name);
        let _entered = span.enter();
        Self::run_notification_loop(rx, worker_handlers, worker_slot_name.clone());
      })
      .map_err(|e| {
        error!(slot_name = %*self.slot_name, "Failed to spawn notification thread: {}", e);
        SlotError::ThreadSpawn(e.to_string())
      })?;

    *tx_guard = Some(tx);
    Ok(())
  }

  fn run_notification_loop(
    mut queue_rx: mpsc::UnboundedReceiver<InternalCompletionMessage>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
    slot_name: Arc<String>,
  ) {
    info!("Notification thread started.");

    // Returns `None` once every sender is dropped and the queue is drained.
    while let Some(message) = queue_rx.blocking_recv() {
      // Snapshot so handlers may register further handlers without deadlocking.
      let handlers_snapshot: Vec<CompletionHandler> = handlers.read().clone();
      if handlers_snapshot.is_empty() {
        trace!(task_id = %message.task_id, "No completion handlers registered, dropping notification.");
        continue;
      }

      let public_info = TaskCompletionInfo {
        task_id: message.task_id,
        slot_name: slot_name.clone(),
        status: message.status,
        run_invoked: message.run_invoked,
        completion_time: SystemTime::now(),
      };

      debug!(
        task_id = %public_info.task_id,
        status = ?public_info.status,
        "Dispatching notification to {} handlers.",
        handlers_snapshot.len()
      );

      for handler in handlers_snapshot.iter() {
        let info_for_handler = public_info.clone();
        let result = catch_unwind(AssertUnwindSafe(|| handler(info_for_handler)));
        if result.is_err() {
          error!(
            task_id = %public_info.task_id,
            "A completion handler panicked during execution."
          );
        }
      }
    }

    info!("Notification thread stopped (input queue closed and drained).");
  }
}

impl Drop for CompletionNotifier {
  fn drop(&mut self) {
    // Closing the channel lets the detached dispatch thread drain and exit.
    if self.tx.get_mut().take().is_some() {
      trace!(slot_name = %*self.slot_name, "Notifier dropped. Dispatch thread will drain remaining messages.");
    }
  }
}
