use task_slot::{BoundedTaskSlot, SlotConfig, TaskCompletionInfo, TaskFn, TaskStatus};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tokio::time::{sleep, timeout};
use tracing;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);

// Helper to create a task that sleeps in 10ms steps and honors its token.
fn create_task(task_id_for_log: usize, duration_ms: u64, should_panic: bool) -> TaskFn {
  TaskFn::new(move |token| {
    let deadline = Instant::now() + Duration::from_millis(duration_ms);
    while Instant::now() < deadline {
      if token.is_cancelled() {
        tracing::info!("Task {} (notifier test context) observed cancellation.", task_id_for_log);
        return;
      }
      thread::sleep(Duration::from_millis(10));
    }
    if should_panic {
      tracing::info!("Task {} (notifier test context) panicking as requested.", task_id_for_log);
      panic!("Task {} (notifier test context) intentionally panicked!", task_id_for_log);
    }
    tracing::info!("Task {} (notifier test context) completed successfully.", task_id_for_log);
  })
}

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_slot=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting notifications in tests
fn create_collecting_handler() -> (
  Arc<Mutex<Vec<TaskCompletionInfo>>>,
  impl Fn(TaskCompletionInfo) + Send + Sync + 'static,
) {
  let collected_notifications = Arc::new(Mutex::new(Vec::new()));
  let collected_notifications_clone = collected_notifications.clone();
  let handler = move |info: TaskCompletionInfo| {
    tracing::debug!(
      "Test Collecting Handler: Received notification for task_id: {}, status: {:?}",
      info.task_id,
      info.status
    );
    collected_notifications_clone.lock().unwrap().push(info);
  };
  (collected_notifications, handler)
}

async fn wait_for_notifications(notifications: &Arc<Mutex<Vec<TaskCompletionInfo>>>, count: usize) -> bool {
  let start = Instant::now();
  while start.elapsed() < COMPLETION_TIMEOUT {
    if notifications.lock().unwrap().len() >= count {
      return true;
    }
    sleep(Duration::from_millis(5)).await;
  }
  false
}

fn slot_named(name: &str, capacity: usize) -> Arc<BoundedTaskSlot> {
  BoundedTaskSlot::new(SlotConfig::default().with_name(name).with_capacity(capacity)).unwrap()
}

#[tokio::test]
async fn test_completion_notifier_success() {
  setup_tracing_for_test();
  let slot_name = "test_notifier_success";
  let slot = slot_named(slot_name, 1);
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();
  assert_eq!(slot.completion_handler_count(), 1);

  let handle = slot.submit(create_task(10, 30, false)).unwrap();
  let task_id = handle.id();
  assert_eq!(
    timeout(COMPLETION_TIMEOUT, handle.await_completion()).await.unwrap(),
    Ok(TaskStatus::Completed)
  );
  assert!(wait_for_notifications(&notifications, 1).await);
  slot.dispose().unwrap();

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  let info = &notifs[0];
  assert_eq!(info.task_id, task_id);
  assert_eq!(*info.slot_name, slot_name);
  assert_eq!(info.status, TaskStatus::Completed);
  assert!(info.completion_time <= SystemTime::now());
}

#[tokio::test]
async fn test_completion_notifier_panic() {
  setup_tracing_for_test();
  let slot = slot_named("test_notifier_panic", 1);
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();

  let handle = slot.submit(create_task(20, 20, true)).unwrap();
  assert_eq!(
    timeout(COMPLETION_TIMEOUT, handle.await_completion()).await.unwrap(),
    Ok(TaskStatus::Panicked)
  );
  assert!(wait_for_notifications(&notifications, 1).await);
  slot.dispose().unwrap();

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs[0].task_id, handle.id());
  assert_eq!(notifs[0].status, TaskStatus::Panicked);
}

#[tokio::test]
async fn test_completion_notifier_reports_evictions() {
  setup_tracing_for_test();
  let slot = slot_named("test_notifier_eviction", 1);
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();

  let running = slot.submit(create_task(1, 5_000, false)).unwrap();
  let start = Instant::now();
  while running.status() != TaskStatus::Running && start.elapsed() < COMPLETION_TIMEOUT {
    sleep(Duration::from_millis(5)).await;
  }

  let evicted = slot.submit(create_task(2, 10, false)).unwrap();
  let survivor = slot.submit_preemptive(create_task(3, 10, false)).unwrap();
  assert_eq!(evicted.status(), TaskStatus::Evicted);

  assert_eq!(
    timeout(COMPLETION_TIMEOUT, survivor.await_completion()).await.unwrap(),
    Ok(TaskStatus::Completed)
  );
  assert!(wait_for_notifications(&notifications, 3).await);
  slot.dispose().unwrap();

  let notifs = notifications.lock().unwrap();
  let status_of = |id: u64| notifs.iter().find(|n| n.task_id == id).map(|n| n.status);
  assert_eq!(status_of(evicted.id()), Some(TaskStatus::Evicted));
  assert_eq!(status_of(running.id()), Some(TaskStatus::Cancelled));
  assert_eq!(status_of(survivor.id()), Some(TaskStatus::Completed));
  // The eviction happened before the preempted task returned.
  assert_eq!(notifs[0].task_id, evicted.id());

  // `Cancelled` alone does not say whether the task ran; the flag does.
  let ran = |id: u64| notifs.iter().find(|n| n.task_id == id).map(|n| n.run_invoked);
  assert_eq!(ran(evicted.id()), Some(false));
  assert_eq!(ran(running.id()), Some(true));
  assert_eq!(ran(survivor.id()), Some(true));
}

#[tokio::test]
async fn test_completion_notifier_reports_discarded_on_dispose() {
  setup_tracing_for_test();
  let slot = slot_named("test_notifier_discard", 2);
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();

  let running = slot.submit(create_task(1, 5_000, false)).unwrap();
  let start = Instant::now();
  while running.status() != TaskStatus::Running && start.elapsed() < COMPLETION_TIMEOUT {
    sleep(Duration::from_millis(5)).await;
  }
  let pending = slot.submit(create_task(2, 10, false)).unwrap();

  slot.dispose().unwrap();
  assert!(wait_for_notifications(&notifications, 2).await);

  let notifs = notifications.lock().unwrap();
  let status_of = |id: u64| notifs.iter().find(|n| n.task_id == id).map(|n| n.status);
  assert_eq!(status_of(pending.id()), Some(TaskStatus::Discarded));
  assert_eq!(status_of(running.id()), Some(TaskStatus::Cancelled));
  assert!(notifs.iter().all(|n| n.run_invoked == (n.task_id == running.id())));
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_others() {
  setup_tracing_for_test();
  let slot = slot_named("test_notifier_handler_panic", 1);
  slot
    .add_completion_handler(|info: TaskCompletionInfo| {
      panic!("Handler intentionally panicked for task {}", info.task_id);
    })
    .unwrap();
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();
  assert_eq!(slot.completion_handler_count(), 2);

  for i in 0..2 {
    let handle = slot.submit(create_task(i, 10, false)).unwrap();
    assert_eq!(
      timeout(COMPLETION_TIMEOUT, handle.await_completion()).await.unwrap(),
      Ok(TaskStatus::Completed)
    );
  }

  assert!(wait_for_notifications(&notifications, 2).await);
  slot.dispose().unwrap();
}

#[tokio::test]
async fn test_no_handlers_means_no_dispatch() {
  setup_tracing_for_test();
  let slot = slot_named("test_notifier_without_handlers", 1);
  assert_eq!(slot.completion_handler_count(), 0);

  let handle = slot.submit(create_task(1, 10, false)).unwrap();
  assert_eq!(
    timeout(COMPLETION_TIMEOUT, handle.await_completion()).await.unwrap(),
    Ok(TaskStatus::Completed)
  );

  // A handler added later only sees later tasks.
  let seen_first = Arc::new(AtomicBool::new(false));
  let seen_first_clone = seen_first.clone();
  let first_id = handle.id();
  slot
    .add_completion_handler(move |info: TaskCompletionInfo| {
      if info.task_id == first_id {
        seen_first_clone.store(true, Ordering::SeqCst);
      }
    })
    .unwrap();
  let (notifications, handler) = create_collecting_handler();
  slot.add_completion_handler(handler).unwrap();

  let second = slot.submit(create_task(2, 10, false)).unwrap();
  assert_eq!(
    timeout(COMPLETION_TIMEOUT, second.await_completion()).await.unwrap(),
    Ok(TaskStatus::Completed)
  );
  assert!(wait_for_notifications(&notifications, 1).await);
  slot.dispose().unwrap();

  assert!(!seen_first.load(Ordering::SeqCst));
  assert_eq!(notifications.lock().unwrap()[0].task_id, second.id());
}
