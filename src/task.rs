use crate::notifier::TaskStatus;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A unit of work the slot can run and ask to stop.
///
/// `run` is invoked at most once, on a worker thread owned by the slot.
/// `cancel` may be called from any thread while `run` is executing, so it
/// must be idempotent and must not block. Cancellation is advisory: `run`
/// is expected to poll its own flag and return early.
pub trait CancellableTask: Send + Sync + 'static {
  fn run(&self);
  fn cancel(&self);
}

impl<T: CancellableTask + ?Sized> CancellableTask for Arc<T> {
  fn run(&self) {
    (**self).run()
  }

  fn cancel(&self) {
    (**self).cancel()
  }
}

type TaskBody = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// A [`CancellableTask`] built from a closure and a [`CancellationToken`].
///
/// The closure receives the token and should check `is_cancelled()` at its
/// natural suspension points.
pub struct TaskFn {
  body: Mutex<Option<TaskBody>>,
  token: CancellationToken,
}

impl TaskFn {
  pub fn new<F>(body: F) -> Self
  where
    F: FnOnce(&CancellationToken) + Send + 'static,
  {
    Self::with_token(CancellationToken::new(), body)
  }

  /// Uses a caller-provided token, so the caller can keep a clone and watch it.
  pub fn with_token<F>(token: CancellationToken, body: F) -> Self
  where
    F: FnOnce(&CancellationToken) + Send + 'static,
  {
    Self {
      body: Mutex::new(Some(Box::new(body))),
      token,
    }
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

impl CancellableTask for TaskFn {
  fn run(&self) {
    // Take the body out first so the lock is not held while it runs.
    let body = self.body.lock().take();
    match body {
      Some(body) => body(&self.token),
      None => tracing::trace!("TaskFn: body already consumed, run() is a no-op."),
    }
  }

  fn cancel(&self) {
    self.token.cancel();
  }
}

impl fmt::Debug for TaskFn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskFn")
      .field("consumed", &self.body.lock().is_none())
      .field("cancelled", &self.token.is_cancelled())
      .finish()
  }
}

/// Internal representation of a task owned by the slot.
///
/// Shared between the slot (queue or running record) and the producer's
/// `TaskHandle`.
pub(crate) struct ManagedTask {
  pub(crate) task_id: u64,
  task: Box<dyn CancellableTask>,
  cancel_requested: AtomicBool,
  run_invoked: AtomicBool,
  status_tx: watch::Sender<TaskStatus>,
}

impl ManagedTask {
  pub(crate) fn new(task_id: u64, task: Box<dyn CancellableTask>) -> Arc<Self> {
    let (status_tx, _) = watch::channel(TaskStatus::Pending);
    Arc::new(Self {
      task_id,
      task,
      cancel_requested: AtomicBool::new(false),
      run_invoked: AtomicBool::new(false),
      status_tx,
    })
  }

  pub(crate) fn run(&self) {
    self.run_invoked.store(true, AtomicOrdering::SeqCst);
    self.task.run();
  }

  pub(crate) fn run_invoked(&self) -> bool {
    self.run_invoked.load(AtomicOrdering::SeqCst)
  }

  /// Flags the task and forwards the request to the task itself.
  pub(crate) fn request_cancel(&self) {
    self.cancel_requested.store(true, AtomicOrdering::SeqCst);
    self.task.cancel();
  }

  pub(crate) fn is_cancel_requested(&self) -> bool {
    self.cancel_requested.load(AtomicOrdering::SeqCst)
  }

  pub(crate) fn status(&self) -> TaskStatus {
    *self.status_tx.borrow()
  }

  pub(crate) fn set_status(&self, status: TaskStatus) {
    self.status_tx.send_replace(status);
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<TaskStatus> {
    self.status_tx.subscribe()
  }
}

impl fmt::Debug for ManagedTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedTask")
      .field("task_id", &self.task_id)
      .field("status", &self.status())
      .field("cancel_requested", &self.is_cancel_requested())
      .field("run_invoked", &self.run_invoked())
      .finish_non_exhaustive()
  }
}
