use task_slot::{BoundedTaskSlot, SlotConfig, TaskFn, TaskStatus};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

// Pretends to scan a large corpus, publishing results through a side channel.
fn search(query: &'static str, results: Arc<Mutex<Vec<String>>>) -> TaskFn {
  TaskFn::new(move |token| {
    info!("Searching for {:?}", query);
    for chunk in 0..10 {
      if token.is_cancelled() {
        info!("Search for {:?} superseded after {} chunks", query, chunk);
        return;
      }
      thread::sleep(Duration::from_millis(50));
    }
    results.lock().unwrap().push(format!("results for {:?}", query));
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Preemptive Search Example ---");

  let slot = BoundedTaskSlot::new(SlotConfig::default().with_name("search_slot"))
    .expect("Failed to create task slot");
  let results = Arc::new(Mutex::new(Vec::new()));

  // Simulate a user typing faster than a search can complete.
  let mut last_handle = None;
  for query in ["r", "ru", "rus", "rust"] {
    let handle = slot
      .submit_preemptive(search(query, results.clone()))
      .expect("Slot unexpectedly disposed");
    last_handle = Some(handle);
    tokio::time::sleep(Duration::from_millis(80)).await;
  }

  if let Some(handle) = last_handle {
    let status = handle.await_completion().await.expect("Status channel closed");
    assert_eq!(status, TaskStatus::Completed);
  }

  info!("Published results: {:?}", results.lock().unwrap());
  slot.dispose().expect("Slot dispose failed");
  info!("--- Preemptive Search Example End ---");
}
