// In-memory Task Queue
// Shared FIFO between the job manager, retrying workers and consumers

use crate::domain::{TaskHandle, TaskId};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueInner {
    items: VecDeque<TaskHandle>,
    queued: HashSet<TaskId>,
}

/// Unbounded FIFO of task handles with blocking pop
///
/// A task that is already waiting in the queue is not added a second time.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handle; returns false if it was already queued
    pub fn push(&self, handle: TaskHandle) -> bool {
        {
            let mut inner = self.lock();
            if !inner.queued.insert(handle.task_id.clone()) {
                return false;
            }
            inner.items.push_back(handle);
        }
        self.notify.notify_one();
        true
    }

    /// Append handles in order; returns how many were newly queued
    pub fn push_all<I>(&self, handles: I) -> usize
    where
        I: IntoIterator<Item = TaskHandle>,
    {
        handles
            .into_iter()
            .map(|handle| self.push(handle))
            .filter(|added| *added)
            .count()
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<TaskHandle> {
        let mut inner = self.lock();
        let handle = inner.items.pop_front()?;
        inner.queued.remove(&handle.task_id);
        Some(handle)
    }

    /// Pop, waiting up to `timeout` for a handle to arrive
    pub async fn pop(&self, timeout: Duration) -> Option<TaskHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.try_pop() {
                return Some(handle);
            }
            // notify_one stores a permit when nobody waits, so a push between
            // try_pop and this await is not lost
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Drop every waiting handle of a job; returns how many were removed
    pub fn purge_job(&self, job_id: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.items.len();
        let QueueInner { items, queued } = &mut *inner;
        items.retain(|handle| {
            if handle.job_id == job_id {
                queued.remove(&handle.task_id);
                false
            } else {
                true
            }
        });
        before - inner.items.len()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(job: &str, task: &str) -> TaskHandle {
        TaskHandle {
            task_id: task.to_string(),
            job_id: job.to_string(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        queue.push(handle("j", "t1"));
        queue.push(handle("j", "t2"));
        queue.push(handle("j", "t3"));

        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop())
            .map(|h| h.task_id)
            .collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_duplicate_push_is_ignored() {
        let queue = TaskQueue::new();
        assert!(queue.push(handle("j", "t1")));
        assert!(!queue.push(handle("j", "t1")));
        assert_eq!(queue.len(), 1);

        // Once popped, the task may be queued again (retry)
        queue.try_pop().unwrap();
        assert!(queue.push(handle("j", "t1")));
    }

    #[test]
    fn test_push_all_counts_new_handles() {
        let queue = TaskQueue::new();
        queue.push(handle("j", "t1"));
        let added = queue.push_all(vec![handle("j", "t1"), handle("j", "t2")]);
        assert_eq!(added, 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_purge_job_keeps_other_jobs() {
        let queue = TaskQueue::new();
        queue.push(handle("a", "a1"));
        queue.push(handle("b", "b1"));
        queue.push(handle("a", "a2"));

        assert_eq!(queue.purge_job("a"), 2);
        assert_eq!(queue.try_pop().unwrap().task_id, "b1");
        assert!(queue.is_empty());
        assert!(queue.push(handle("a", "a1")));
    }

    #[test]
    fn test_pop_returns_queued_handle_without_waiting() {
        let queue = TaskQueue::new();
        queue.push(handle("j", "t1"));

        let popped = tokio_test::block_on(queue.pop(Duration::from_secs(60)));
        assert_eq!(popped.map(|h| h.task_id).as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue = TaskQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.pop(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(handle("j", "t1"));

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake up")
            .unwrap();
        assert_eq!(popped.unwrap().task_id, "t1");
    }

    #[tokio::test]
    async fn test_concurrent_consumers_receive_each_handle_once() {
        let queue = Arc::new(TaskQueue::new());
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(h) = queue.pop(Duration::from_millis(100)).await {
                    seen.push(h.task_id);
                }
                seen
            }));
        }

        for i in 0..100 {
            queue.push(handle("j", &format!("t{}", i)));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort();
        let delivered = all.len();
        all.dedup();
        assert_eq!(delivered, 100);
        assert_eq!(all.len(), 100);
    }
}
