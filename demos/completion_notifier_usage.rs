use task_slot::{BoundedTaskSlot, SlotConfig, TaskCompletionInfo, TaskFn, TaskHandle, TaskStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

// Dummy task body
fn my_notified_task(id: usize, delay_ms: u64, should_panic: bool) -> TaskFn {
  TaskFn::new(move |token| {
    info!(
      "NotifiedTask {}: Starting, will sleep for {}ms. Panic: {}",
      id, delay_ms, should_panic
    );
    for _ in 0..(delay_ms / 10) {
      if token.is_cancelled() {
        info!("NotifiedTask {}: Cancelled.", id);
        return;
      }
      thread::sleep(Duration::from_millis(10));
    }
    if should_panic {
      info!("NotifiedTask {}: Panicking as requested!", id);
      panic!("NotifiedTask {} panicked!", id);
    }
    info!("NotifiedTask {} finished successfully after {}ms", id, delay_ms);
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Completion Notifier Example ---");

  let slot = BoundedTaskSlot::new(SlotConfig::default().with_name("notifier_example_slot").with_capacity(2))
    .expect("Failed to create task slot");

  // --- Setup Completion Handlers ---
  let completed_count = Arc::new(AtomicUsize::new(0));
  let dropped_count = Arc::new(AtomicUsize::new(0)); // Evicted or Discarded

  // Handler 1: Simple logger
  slot
    .add_completion_handler(|info: TaskCompletionInfo| {
      info!(
        "[Handler 1 - Logger] Task {} (Slot: {}) ended. Status: {:?}, Time: {:?}",
        info.task_id, info.slot_name, info.status, info.completion_time
      );
    })
    .expect("Failed to register handler");

  // Handler 2: Counter
  let c_clone = completed_count.clone();
  let d_clone = dropped_count.clone();
  slot
    .add_completion_handler(move |info: TaskCompletionInfo| match info.status {
      TaskStatus::Completed => {
        c_clone.fetch_add(1, Ordering::Relaxed);
      }
      TaskStatus::Evicted | TaskStatus::Discarded => {
        d_clone.fetch_add(1, Ordering::Relaxed);
      }
      other => info!("[Handler 2 - Counter] Task {} ended as {:?}.", info.task_id, other),
    })
    .expect("Failed to register handler");

  // --- Submit Tasks ---
  let mut handles: Vec<TaskHandle> = Vec::new();
  for i in 0..4 {
    let should_panic = i == 1;
    handles.push(slot.submit(my_notified_task(i, 200, should_panic)).expect("Submit failed"));
  }

  for handle in &handles {
    let status = handle.await_completion().await.expect("Status channel closed");
    info!("Task {} resolved as {:?}", handle.id(), status);
  }

  // Give the notification thread a moment to drain.
  tokio::time::sleep(Duration::from_millis(50)).await;
  slot.dispose().expect("Slot dispose failed");

  info!(
    "Completed: {}, evicted or discarded: {}",
    completed_count.load(Ordering::Relaxed),
    dropped_count.load(Ordering::Relaxed)
  );
  info!("--- Completion Notifier Example End ---");
}
