use task_slot::{BoundedTaskSlot, SlotConfig, TaskFn, TaskHandle};
use std::thread;
use std::time::Duration;
use tracing::info;

fn render_preview(id: usize, steps: u64) -> TaskFn {
  TaskFn::new(move |token| {
    info!("Preview {} starting, {} steps", id, steps);
    for step in 0..steps {
      if token.is_cancelled() {
        info!("Preview {} cancelled at step {}", id, step);
        return;
      }
      thread::sleep(Duration::from_millis(100));
    }
    info!("Preview {} finished", id);
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let slot = BoundedTaskSlot::new(SlotConfig::default().with_name("basic_slot").with_capacity(2))
    .expect("Failed to create task slot");

  let mut handles: Vec<TaskHandle> = Vec::new();

  // One runs, two wait, the rest push the oldest waiting ones out.
  for i in 0..5 {
    match slot.submit(render_preview(i, 3)) {
      Ok(handle) => {
        info!("Submitted preview {} with handle id {}", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit preview {}: {}", i, e),
    }
  }
  info!("Pending task ids: {:?}", slot.pending_task_ids());

  for handle in handles {
    match handle.await_completion().await {
      Ok(status) => info!("Task {} ended as {:?}", handle.id(), status),
      Err(e) => info!("Task {} status unavailable: {}", handle.id(), e),
    }
  }

  info!("Idle: {}. Disposing slot.", slot.is_idle());
  slot.dispose().expect("Slot dispose failed");
  info!("--- Basic Usage Example End ---");
}
