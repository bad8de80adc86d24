use crate::config::{SlotConfig, MAX_TASK_RUNTIME_LIMIT};
use crate::error::SlotError;
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskStatus};
use crate::task::{CancellableTask, ManagedTask};
use crate::task_queue::PendingQueue;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, trace, warn};

/// Everything producers and the control loop race on. Guarded by one mutex.
struct SlotState {
  pending: PendingQueue,
  running: Option<Arc<ManagedTask>>,
  /// Worker thread currently inside the running task's `run()`.
  running_thread: Option<ThreadId>,
  disposed: bool,
}

struct SlotShared {
  slot_name: Arc<String>,
  capacity: usize,
  max_task_runtime: Duration,
  next_task_id: AtomicU64,
  state: Mutex<SlotState>,
  /// Wakes the control loop: new submission, worker finished, or disposal.
  work_available: Condvar,
  /// Wakes `dispose` callers waiting for the running task to exit.
  task_finished: Condvar,
  notifier: CompletionNotifier,
}

impl SlotShared {
  /// Marks the slot disposed, cancels the running task and discards the queue.
  /// Returns `true` for the call that performed the transition.
  fn begin_dispose(&self) -> bool {
    let mut state = self.state.lock();
    let first = !state.disposed;
    state.disposed = true;

    if let Some(running) = state.running.as_ref() {
      debug!(slot_name = %*self.slot_name, task_id = %running.task_id, "Dispose: cancelling running task.");
      running.request_cancel();
    }

    for task in state.pending.drain() {
      debug!(slot_name = %*self.slot_name, task_id = %task.task_id, "Dispose: discarding pending task.");
      self.finish_unstarted(&task, TaskStatus::Discarded);
    }
    self.work_available.notify_all();
    first
  }

  /// Waits up to `grace` for the running task to exit.
  /// Returns the ID of the task still running when the wait gave up.
  fn wait_for_running_to_exit(&self, grace: Duration) -> Option<u64> {
    let now = Instant::now();
    let deadline = now
      .checked_add(grace)
      .or_else(|| now.checked_add(MAX_TASK_RUNTIME_LIMIT))
      .unwrap_or(now);
    let mut state = self.state.lock();
    while state.running.is_some() {
      if self.task_finished.wait_until(&mut state, deadline).timed_out() {
        return state.running.as_ref().map(|task| task.task_id);
      }
    }
    None
  }

  /// `true` when called from the worker thread of the running task.
  fn is_running_on_current_thread(&self) -> bool {
    self.state.lock().running_thread == Some(thread::current().id())
  }

  /// Resolves a task that never reached a worker.
  fn finish_unstarted(&self, task: &ManagedTask, status: TaskStatus) {
    task.set_status(status);
    self.notifier.notify(task.task_id, status, task.run_invoked());
  }

  /// Clears the running record for `task` and publishes its terminal status.
  fn finish_running(&self, task: &Arc<ManagedTask>, status: TaskStatus) {
    {
      let mut state = self.state.lock();
      if state.running.as_ref().is_some_and(|running| Arc::ptr_eq(running, task)) {
        state.running = None;
        state.running_thread = None;
      }
      self.work_available.notify_one();
      self.task_finished.notify_all();
    }
    task.set_status(status);
    self.notifier.notify(task.task_id, status, task.run_invoked());
  }
}

/// A bounded, single-worker scheduler for cancellable background tasks.
///
/// At most one task runs at a time. Pending tasks wait in a FIFO of at most
/// `capacity` entries; a submission to a full queue evicts the oldest pending
/// task without running it. [`submit_preemptive`](Self::submit_preemptive)
/// additionally asks the running task to cancel, so the latest request wins.
///
/// Each slot owns a dedicated control thread for its whole lifetime and spawns
/// one short-lived worker thread per task. Cancellation is cooperative only:
/// worker threads are never interrupted.
///
/// Submissions after [`dispose`](Self::dispose) are rejected with
/// [`SlotError::Disposed`] and the submitted task is dropped without running.
///
/// `CancellableTask::cancel` implementations are invoked while the slot's
/// internal lock is held and must not call back into the slot.
pub struct BoundedTaskSlot {
  shared: Arc<SlotShared>,
  control_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for BoundedTaskSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("BoundedTaskSlot")
      .field("slot_name", &self.shared.slot_name)
      .field("pending", &state.pending)
      .field("running", &state.running.as_ref().map(|task| task.task_id))
      .field("disposed", &state.disposed)
      .field("notifier", &self.shared.notifier)
      .finish()
  }
}

impl BoundedTaskSlot {
  /// Validates `config` and starts the control thread.
  ///
  /// # Errors
  /// `SlotError::InvalidCapacity` if `config.capacity` is zero and
  /// `SlotError::InvalidMaxTaskRuntime` if `config.max_task_runtime` exceeds
  /// [`MAX_TASK_RUNTIME_LIMIT`] (no thread is started in either case).
  /// `SlotError::ThreadSpawn` if the control thread cannot be created.
  pub fn new(config: SlotConfig) -> Result<Arc<Self>, SlotError> {
    config.validate()?;

    let slot_name = Arc::new(config.name);
    let shared = Arc::new(SlotShared {
      slot_name: slot_name.clone(),
      capacity: config.capacity,
      max_task_runtime: config.max_task_runtime,
      next_task_id: AtomicU64::new(1),
      state: Mutex::new(SlotState {
        pending: PendingQueue::new(config.capacity),
        running: None,
        running_thread: None,
        disposed: false,
      }),
      work_available: Condvar::new(),
      task_finished: Condvar::new(),
      notifier: CompletionNotifier::new(slot_name.clone()),
    });

    let control_shared = shared.clone();
    let control_join_handle = thread::Builder::new()
      .name(format!("{}-control", slot_name))
      .spawn(move || {
        let span = info_span!("task_slot_control", slot_name = %*control_shared.slot_name);
        let _entered = span.enter();
        Self::run_control_loop(control_shared);
      })
      .map_err(|e| {
        error!(slot_name = %*slot_name, "Failed to spawn control thread: {}", e);
        SlotError::ThreadSpawn(e.to_string())
      })?;

    info!(
      slot_name = %*slot_name,
      capacity = config.capacity,
      max_task_runtime = ?config.max_task_runtime,
      "Task slot created."
    );

    Ok(Arc::new(Self {
      shared,
      control_join_handle: Mutex::new(Some(control_join_handle)),
    }))
  }

  /// Shorthand for a default-configured slot with the given capacity.
  pub fn with_capacity(capacity: usize) -> Result<Arc<Self>, SlotError> {
    Self::new(SlotConfig::default().with_capacity(capacity))
  }

  pub fn name(&self) -> &str {
    &self.shared.slot_name
  }

  pub fn capacity(&self) -> usize {
    self.shared.capacity
  }

  pub fn max_task_runtime(&self) -> Duration {
    self.shared.max_task_runtime
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn pending_count(&self) -> usize {
    self.shared.state.lock().pending.len()
  }

  /// IDs of pending tasks, oldest first.
  pub fn pending_task_ids(&self) -> Vec<u64> {
    self.shared.state.lock().pending.task_ids()
  }

  pub fn running_task_id(&self) -> Option<u64> {
    self.shared.state.lock().running.as_ref().map(|task| task.task_id)
  }

  /// `true` iff no task is running and nothing is pending.
  pub fn is_idle(&self) -> bool {
    let state = self.shared.state.lock();
    state.running.is_none() && state.pending.is_empty()
  }

  pub fn is_disposed(&self) -> bool {
    self.shared.state.lock().disposed
  }

  /// Queues `task` behind any pending work, evicting the oldest pending task
  /// if the queue is full. The running task is left alone.
  pub fn submit(&self, task: impl CancellableTask) -> Result<TaskHandle, SlotError> {
    self.enqueue(Box::new(task), false)
  }

  /// Asks the running task (if any) to cancel, then queues `task` as
  /// [`submit`](Self::submit) does. Does not wait for the running task to stop.
  pub fn submit_preemptive(&self, task: impl CancellableTask) -> Result<TaskHandle, SlotError> {
    self.enqueue(Box::new(task), true)
  }

  /// Registers a handler called once for every task reaching a terminal status,
  /// including evicted and discarded tasks.
  ///
  /// Handlers run on a dedicated notification thread. A handler that holds a
  /// strong reference to this slot keeps it alive; capture a `Weak` instead.
  pub fn add_completion_handler(
    &self,
    handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static,
  ) -> Result<(), SlotError> {
    self.shared.notifier.add_handler(handler)
  }

  pub fn completion_handler_count(&self) -> usize {
    self.shared.notifier.handler_count()
  }

  /// Shuts the slot down. Safe to call more than once.
  ///
  /// No task starts after this call. Pending tasks are discarded, the running
  /// task is cancelled, and the call waits up to the configured maximum task
  /// runtime for it to exit.
  ///
  /// Called from inside the running task's own `run()`, it does not wait for
  /// that task (it cannot exit while its `run()` is on the stack) and returns
  /// `Ok(())` once the slot is marked disposed. The task sees its cancellation
  /// flag set and finishes as `Cancelled` when it returns.
  ///
  /// # Errors
  /// `SlotError::DisposeTimeout` if the running task ignored cancellation for
  /// the whole grace period. Its worker thread is detached and keeps running
  /// until the task returns on its own; the slot is disposed regardless.
  pub fn dispose(&self) -> Result<(), SlotError> {
    let slot_name = &*self.shared.slot_name;
    if self.shared.begin_dispose() {
      info!(slot_name = %slot_name, "Initiating task slot dispose.");
    } else {
      info!(slot_name = %slot_name, "Dispose already initiated by another call or Drop.");
    }

    if self.shared.is_running_on_current_thread() {
      // The control loop has seen the disposed flag and does not wait for the
      // worker, so joining it here is safe.
      debug!(slot_name = %slot_name, "Dispose called from the running task. Not waiting for it to exit.");
      self.join_control_loop();
      return Ok(());
    }

    let grace = self.shared.max_task_runtime;
    let outcome = match self.shared.wait_for_running_to_exit(grace) {
      None => Ok(()),
      Some(task_id) => {
        warn!(
          slot_name = %slot_name,
          %task_id,
          ?grace,
          "Running task ignored cancellation for the whole grace period. Detaching its worker."
        );
        Err(SlotError::DisposeTimeout { task_id, grace })
      }
    };

    self.join_control_loop();
    outcome
  }

  // The control loop exits as soon as it observes the disposed flag, so this join is short.
  fn join_control_loop(&self) {
    let slot_name = &*self.shared.slot_name;
    let handle_to_join = self.control_join_handle.lock().take();
    if let Some(handle) = handle_to_join {
      match handle.join() {
        Ok(()) => debug!(slot_name = %slot_name, "Control loop successfully joined."),
        Err(_) => error!(slot_name = %slot_name, "Control loop panicked before dispose could join it."),
      }
    } else {
      trace!(slot_name = %slot_name, "Control join handle already taken by an earlier dispose call.");
    }
  }

  fn enqueue(&self, task: Box<dyn CancellableTask>, preempt: bool) -> Result<TaskHandle, SlotError> {
    let shared = &self.shared;
    let handle = {
      let mut state = shared.state.lock();
      if state.disposed {
        warn!(slot_name = %*shared.slot_name, "Submit: Attempted to submit task to a disposed slot.");
        return Err(SlotError::Disposed);
      }

      if preempt {
        if let Some(running) = state.running.as_ref() {
          debug!(slot_name = %*shared.slot_name, task_id = %running.task_id, "Preemptive submit: cancelling running task.");
          running.request_cancel();
        }
      }

      // Allocated under the lock so IDs follow queue order.
      let task_id = shared.next_task_id.fetch_add(1, AtomicOrdering::Relaxed);
      let managed = ManagedTask::new(task_id, task);
      let handle = TaskHandle::new(managed.clone());
      let evicted = state.pending.push(managed);
      debug!(slot_name = %*shared.slot_name, %task_id, preempt, pending = state.pending.len(), "Submitted task to queue.");

      // Resolved before unlocking so eviction is reported ahead of anything it raced with.
      for evicted_task in evicted {
        debug!(slot_name = %*shared.slot_name, task_id = %evicted_task.task_id, "Queue full: evicted oldest pending task.");
        shared.finish_unstarted(&evicted_task, TaskStatus::Evicted);
      }

      shared.work_available.notify_one();
      handle
    };

    Ok(handle)
  }

  fn run_control_loop(shared: Arc<SlotShared>) {
    info!("Control loop started.");
    let mut previous_worker: Option<JoinHandle<()>> = None;

    loop {
      let next_task = {
        let mut state = shared.state.lock();
        loop {
          if state.disposed {
            break None;
          }
          if state.running.is_none() {
            if let Some(task) = state.pending.pop_front() {
              if task.is_cancel_requested() {
                debug!(task_id = %task.task_id, "Dequeued task already cancelled via its handle. Skipping.");
                shared.finish_unstarted(&task, TaskStatus::Cancelled);
                continue;
              }
              state.running = Some(task.clone());
              break Some(task);
            }
          }
          trace!("No runnable work. Waiting for a submission or worker completion.");
          shared.work_available.wait(&mut state);
        }
      };

      let Some(task) = next_task else {
        break;
      };

      // The previous worker cleared the running record, so it is only publishing its status.
      if let Some(worker) = previous_worker.take() {
        if worker.join().is_err() {
          error!("Previous worker thread panicked outside of task execution.");
        }
      }

      let task_id = task.task_id;
      debug!(%task_id, "Dequeued task. Spawning worker.");
      let worker_shared = shared.clone();
      let worker_task = task.clone();
      let spawn_result = thread::Builder::new()
        .name(format!("{}-worker-{}", shared.slot_name, task_id))
        .spawn(move || {
          let span = info_span!("slot_task", slot_name = %*worker_shared.slot_name, %task_id);
          let _entered = span.enter();
          Self::execute_task(&worker_shared, &worker_task);
        });

      match spawn_result {
        Ok(worker) => previous_worker = Some(worker),
        Err(e) => {
          error!(%task_id, "Failed to spawn worker thread: {}. Task will not run.", e);
          shared.finish_running(&task, TaskStatus::Panicked);
        }
      }
    }

    if previous_worker.is_some() {
      debug!("Detaching last worker thread.");
    }
    info!("Control loop stopped.");
  }

  fn execute_task(shared: &SlotShared, task: &Arc<ManagedTask>) {
    {
      let mut state = shared.state.lock();
      if state.disposed || task.is_cancel_requested() {
        drop(state);
        debug!("Task cancelled before its worker started it. Skipping run.");
        shared.finish_running(task, TaskStatus::Cancelled);
        return;
      }
      state.running_thread = Some(thread::current().id());
      task.set_status(TaskStatus::Running);
    }

    let status = match catch_unwind(AssertUnwindSafe(|| task.run())) {
      Ok(()) if task.is_cancel_requested() => {
        debug!("Task returned after cancellation was requested.");
        TaskStatus::Cancelled
      }
      Ok(()) => {
        trace!("Task executed successfully.");
        TaskStatus::Completed
      }
      Err(_panic_payload) => {
        error!("Task panicked during execution.");
        TaskStatus::Panicked
      }
    };

    shared.finish_running(task, status);
  }
}

impl Drop for BoundedTaskSlot {
  fn drop(&mut self) {
    // Never waits: the running task may ignore cancellation indefinitely.
    if self.shared.begin_dispose() {
      info!(
        slot_name = %*self.shared.slot_name,
        "BoundedTaskSlot dropped without dispose. Signalled control loop to stop and cancelled running task."
      );
    } else {
      trace!(slot_name = %*self.shared.slot_name, "Drop: Dispose already performed. No new signals sent.");
    }
  }
}
