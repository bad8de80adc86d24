use crate::task::ManagedTask;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A bounded FIFO of tasks that have been submitted but not started.
///
/// Unlike a back-pressuring queue, a full `PendingQueue` never makes the
/// producer wait: the oldest entry is evicted to make room for the newest.
/// The queue has no locking of its own. It lives inside the slot's state
/// mutex together with the running-task record, so eviction, enqueue and
/// dequeue are never observed half-done.
pub(crate) struct PendingQueue {
  entries: VecDeque<Arc<ManagedTask>>,
  capacity: usize,
}

impl fmt::Debug for PendingQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingQueue")
      .field("task_ids", &self.task_ids())
      .field("capacity", &self.capacity)
      .finish()
  }
}

impl PendingQueue {
  /// `capacity` is validated by the slot config and is at least 1.
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      entries: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Appends `task`, returning the entries evicted to keep the bound.
  pub(crate) fn push(&mut self, task: Arc<ManagedTask>) -> Vec<Arc<ManagedTask>> {
    let mut evicted = Vec::new();
    while self.entries.len() >= self.capacity {
      match self.entries.pop_front() {
        Some(oldest) => evicted.push(oldest),
        None => break,
      }
    }
    self.entries.push_back(task);
    evicted
  }

  /// Removes the oldest pending task.
  pub(crate) fn pop_front(&mut self) -> Option<Arc<ManagedTask>> {
    self.entries.pop_front()
  }

  /// Empties the queue, oldest first.
  pub(crate) fn drain(&mut self) -> Vec<Arc<ManagedTask>> {
    self.entries.drain(..).collect()
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub(crate) fn task_ids(&self) -> Vec<u64> {
    self.entries.iter().map(|task| task.task_id).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::TaskFn;

  // Helper to create a dummy ManagedTask for testing the queue.
  fn dummy_task(id: u64) -> Arc<ManagedTask> {
    ManagedTask::new(id, Box::new(TaskFn::new(|_| {})))
  }

  #[test]
  fn test_queue_push_pop_is_fifo() {
    let mut queue = PendingQueue::new(5);
    for id in 1..=3 {
      assert!(queue.push(dummy_task(id)).is_empty());
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(1));
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(2));
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(3));
    assert!(queue.pop_front().is_none());
    assert!(queue.is_empty());
  }

  #[test]
  fn test_queue_evicts_oldest_when_full() {
    let mut queue = PendingQueue::new(3);
    let mut evicted_ids = Vec::new();
    for id in 1..=5 {
      evicted_ids.extend(queue.push(dummy_task(id)).into_iter().map(|t| t.task_id));
    }

    assert_eq!(evicted_ids, vec![1, 2]);
    assert_eq!(queue.task_ids(), vec![3, 4, 5]);
  }

  #[test]
  fn test_capacity_one_keeps_only_latest() {
    let mut queue = PendingQueue::new(1);
    assert!(queue.push(dummy_task(1)).is_empty());
    let evicted = queue.push(dummy_task(2));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].task_id, 1);
    assert_eq!(queue.task_ids(), vec![2]);
  }

  #[test]
  fn test_drain_empties_in_order() {
    let mut queue = PendingQueue::new(4);
    for id in 10..14 {
      queue.push(dummy_task(id));
    }
    let drained: Vec<u64> = queue.drain().into_iter().map(|t| t.task_id).collect();
    assert_eq!(drained, vec![10, 11, 12, 13]);
    assert!(queue.is_empty());

    // The queue remains usable after draining.
    assert!(queue.push(dummy_task(20)).is_empty());
    assert_eq!(queue.task_ids(), vec![20]);
  }

  #[test]
  fn test_pop_frees_room_without_eviction() {
    let mut queue = PendingQueue::new(2);
    queue.push(dummy_task(1));
    queue.push(dummy_task(2));
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(1));
    assert!(queue.push(dummy_task(3)).is_empty());
    assert_eq!(queue.task_ids(), vec![2, 3]);
  }
}
