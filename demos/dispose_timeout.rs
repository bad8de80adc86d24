use task_slot::{BoundedTaskSlot, CancellableTask, SlotConfig, SlotError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

// A task that never looks at its cancellation flag.
struct Stubborn;

impl CancellableTask for Stubborn {
  fn run(&self) {
    info!("Stubborn task running for 3s regardless of cancellation.");
    thread::sleep(Duration::from_secs(3));
    info!("Stubborn task finally returned.");
  }

  fn cancel(&self) {
    info!("Stubborn task asked to cancel; ignoring.");
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Dispose Timeout Example ---");

  let slot = BoundedTaskSlot::new(
    SlotConfig::default()
      .with_name("stubborn_slot")
      .with_max_task_runtime(Duration::from_millis(500)),
  )
  .expect("Failed to create task slot");

  slot.submit(Stubborn).expect("Submit failed");
  thread::sleep(Duration::from_millis(100)); // Let the task start

  let started = Instant::now();
  match slot.dispose() {
    Ok(()) => info!("Disposed cleanly."),
    Err(SlotError::DisposeTimeout { task_id, grace }) => {
      warn!("Task {} outlived the {:?} grace period; its worker was detached.", task_id, grace)
    }
    Err(e) => warn!("Unexpected dispose error: {}", e),
  }
  info!("dispose() returned after {:?}", started.elapsed());
  info!("--- Dispose Timeout Example End ---");
}
