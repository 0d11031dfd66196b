//! Priority task queue.
//!
//! A [`TaskQueue`] runs one task at a time. Pending tasks sit in a binary
//! max-heap ordered by a [`Comparator`]; the default one runs higher
//! priorities first, then older tasks, then tasks in insertion order.
//!
//! # Example
//!
//! ```
//! use enip_cip::queue::TaskQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> enip_cip::Result<()> {
//! let queue = TaskQueue::new("example", 8);
//! let handle = queue.schedule(1, async { Ok(21 * 2) })?;
//! assert_eq!(handle.await?, 42);
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{EnipError, Result};

/// Default number of pending tasks a queue accepts.
pub const DEFAULT_CAPACITY: usize = 256;

/// Ordering key of a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityKey {
    /// Caller priority, higher runs first with the default comparator.
    pub priority: u8,
    /// When the task was scheduled.
    pub timestamp: Instant,
    /// Insertion sequence within the queue.
    pub sequence: u64,
}

/// Orders two keys; the greater key runs first.
pub type Comparator = fn(&PriorityKey, &PriorityKey) -> Ordering;

/// Priority descending, then timestamp ascending, then insertion order.
pub fn default_comparator(a: &PriorityKey, b: &PriorityKey) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.sequence.cmp(&a.sequence))
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Entry {
    key: PriorityKey,
    compare: Comparator,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.key, &other.key)
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Entry>,
    running: bool,
    sequence: u64,
}

struct Inner {
    name: &'static str,
    capacity: usize,
    compare: Comparator,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single-flight priority queue of async tasks.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("pending", &self.len())
            .finish()
    }
}

impl TaskQueue {
    /// Creates a queue using [`default_comparator`].
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self::with_comparator(name, capacity, default_comparator)
    }

    /// Creates a queue with a custom ordering.
    pub fn with_comparator(name: &'static str, capacity: usize, compare: Comparator) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                capacity,
                compare,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.inner.state().heap.len()
    }

    /// Returns whether no task is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting tasks.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Queues `task` and returns a future resolving to its output.
    ///
    /// The task is queued immediately, whether or not the returned future is
    /// polled. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::QueueFull` when `capacity` tasks are already
    /// waiting. The returned future yields `EnipError::SessionClosed` if the
    /// task is dropped before it completes.
    pub fn schedule<T, F>(
        &self,
        priority: u8,
        task: F,
    ) -> Result<impl Future<Output = Result<T>> + Send + 'static>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });

        let spawn = {
            let mut state = self.inner.state();
            if state.heap.len() >= self.inner.capacity {
                return Err(EnipError::QueueFull {
                    capacity: self.inner.capacity,
                });
            }
            state.sequence += 1;
            let key = PriorityKey {
                priority,
                timestamp: Instant::now(),
                sequence: state.sequence,
            };
            trace!(queue = self.inner.name, priority, sequence = key.sequence, "task queued");
            state.heap.push(Entry {
                key,
                compare: self.inner.compare,
                job,
            });
            !std::mem::replace(&mut state.running, true)
        };
        if spawn {
            tokio::spawn(drain(self.inner.clone()));
        }

        Ok(async move { rx.await.map_err(|_| EnipError::SessionClosed)? })
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let job = {
            let mut state = inner.state();
            match state.heap.pop() {
                Some(entry) => entry.job,
                None => {
                    state.running = false;
                    return;
                }
            }
        };
        job.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_priority_order() {
        let queue = TaskQueue::new("test", 8);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (id, priority) in [(1, 1u8), (2, 10), (3, 1)] {
            let order = order.clone();
            handles.push(
                queue
                    .schedule(priority, async move {
                        order.lock().unwrap().push(id);
                        Ok(id)
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let queue = TaskQueue::new("test", 2);
        let a = queue.schedule(1, async { Ok(()) }).unwrap();
        let b = queue.schedule(1, async { Ok(()) }).unwrap();
        match queue.schedule(1, async { Ok(()) }) {
            Err(EnipError::QueueFull { capacity }) => assert_eq!(capacity, 2),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("third task should be rejected"),
        }
        a.await.unwrap();
        b.await.unwrap();
        assert!(queue.is_empty());
        assert!(queue.schedule(1, async { Ok(()) }).is_ok());
    }

    #[tokio::test]
    async fn test_one_task_at_a_time() {
        let queue = TaskQueue::new("test", 8);
        let active = Arc::new(Mutex::new((0u32, 0u32)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let active = active.clone();
            handles.push(
                queue
                    .schedule(1, async move {
                        {
                            let mut a = active.lock().unwrap();
                            a.0 += 1;
                            a.1 = a.1.max(a.0);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.lock().unwrap().0 -= 1;
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(active.lock().unwrap().1, 1);
    }

    #[tokio::test]
    async fn test_errors_reach_the_caller() {
        let queue = TaskQueue::new("test", 8);
        let handle = queue
            .schedule(1, async { Err::<(), _>(EnipError::timeout("reply")) })
            .unwrap();
        assert!(matches!(handle.await, Err(EnipError::Timeout { .. })));
    }

    #[test]
    fn test_default_comparator() {
        let now = Instant::now();
        let key = |priority, sequence| PriorityKey {
            priority,
            timestamp: now,
            sequence,
        };
        assert_eq!(default_comparator(&key(10, 2), &key(1, 1)), Ordering::Greater);
        assert_eq!(default_comparator(&key(1, 1), &key(1, 2)), Ordering::Greater);
        let later = PriorityKey {
            timestamp: now + Duration::from_millis(1),
            ..key(1, 0)
        };
        assert_eq!(default_comparator(&later, &key(1, 5)), Ordering::Less);
    }
}
