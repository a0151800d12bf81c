//! Bounded FIFO with push-producer semantics and drop-oldest overflow
//! (spec §4.E).
//!
//! The queue itself is `put`-only: a background task, spawned with it,
//! drains items one at a time into a caller-supplied async callback. The
//! three states spec §4.E describes (paused / idle / draining) collapse
//! here into two booleans (`paused`, `stopped`) plus whether the backing
//! deque is non-empty — `idle` is simply "not paused, not stopped, empty,
//! and no drain task currently holding an item". Every `put` appends and
//! notifies; the drain loop blocks on a [`tokio::sync::Notify`] exactly the
//! way the spec's "cancellable pending promise" waits for the next item, so
//! the "hand directly to an idle callback" fast path in spec §4.E collapses
//! into "notify; the drain loop, which was already awaiting, wakes up on
//! the same scheduler tick" — functionally equivalent, never observably
//! different to a caller since nothing else can run between the two on a
//! single-threaded executor.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tokio::sync::Notify;
use tracing::warn;

pub type DrainCallback<T> = Rc<dyn Fn(T) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    paused: bool,
    stopped: bool,
}

/// A bounded, drop-oldest FIFO queue that drains itself into a callback on a
/// background `spawn_local` task.
///
/// Cloning a `BoundedQueue` shares the same backing state; the typical usage
/// is to clone it into a Dispatcher consumer closure (`queue.put_fn()`)
/// while keeping the original to call `pause`/`resume`/`stop`.
pub struct BoundedQueue<T> {
    inner: Rc<RefCell<Inner<T>>>,
    notify: Rc<Notify>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
        }
    }
}

impl<T: 'static> BoundedQueue<T> {
    /// Creates a queue and spawns its drain task onto the current
    /// `LocalSet`. `capacity` of `None` means unbounded (no drop-oldest
    /// ever triggers).
    pub fn new(capacity: Option<usize>, callback: DrainCallback<T>) -> Self {
        let queue = BoundedQueue {
            inner: Rc::new(RefCell::new(Inner {
                items: VecDeque::new(),
                capacity,
                paused: false,
                stopped: false,
            })),
            notify: Rc::new(Notify::new()),
        };
        queue.clone().spawn_drain_loop(callback);
        queue
    }

    fn spawn_drain_loop(self, callback: DrainCallback<T>) {
        tokio::task::spawn_local(async move {
            loop {
                let item = {
                    let mut inner = self.inner.borrow_mut();
                    if inner.stopped {
                        return;
                    }
                    if inner.paused {
                        None
                    } else {
                        inner.items.pop_front()
                    }
                };

                let Some(item) = item else {
                    self.notify.notified().await;
                    continue;
                };

                if let Err(error) = callback(item).await {
                    warn!(%error, "sink drain callback failed; continuing");
                }

                // Zero-delay reschedule: yield once so other ready tasks on
                // this LocalSet get a turn before we pop the next item,
                // mirroring spec's "schedule the next drain step on a
                // zero-delay timer".
                tokio::task::yield_now().await;

                if self.inner.borrow().stopped {
                    return;
                }
            }
        });
    }

    /// Appends an item, dropping the oldest queued item first if the queue
    /// is at capacity.
    pub fn put(&self, item: T) {
        let mut inner = self.inner.borrow_mut();
        if let Some(capacity) = inner.capacity {
            while inner.items.len() >= capacity {
                inner.items.pop_front();
            }
        }
        inner.items.push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    /// Returns an `Rc<dyn Fn>` suitable for registering with a
    /// [`crate::dispatcher::Dispatcher`], given a function that turns an
    /// `&Event` into the item type this queue carries.
    pub fn put_fn<F>(&self, to_item: F) -> Rc<dyn Fn(&crate::event::Event)>
    where
        F: Fn(&crate::event::Event) -> T + 'static,
    {
        let queue = self.clone();
        Rc::new(move |event: &crate::event::Event| {
            queue.put(to_item(event));
        })
    }

    /// Stops new puts from draining: in-flight callbacks finish, no new
    /// drain step is scheduled.
    pub fn pause(&self) {
        self.inner.borrow_mut().paused = true;
    }

    /// Resumes draining if items are queued.
    pub fn resume(&self) {
        self.inner.borrow_mut().paused = false;
        self.notify.notify_one();
    }

    /// Terminates the drain task. Further `put`s still append but are never
    /// drained.
    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.inner.borrow().paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop_callback(log: Rc<RefCell<Vec<u32>>>) -> DrainCallback<u32> {
        Rc::new(move |item: u32| {
            let log = log.clone();
            Box::pin(async move {
                log.borrow_mut().push(item);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn drains_items_in_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let log = Rc::new(RefCell::new(Vec::new()));
                let queue = BoundedQueue::new(None, noop_callback(log.clone()));
                queue.put(1);
                queue.put(2);
                queue.put(3);
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(*log.borrow(), vec![1, 2, 3]);
            })
            .await;
    }

    #[tokio::test]
    async fn drops_oldest_item_on_overflow() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let log = Rc::new(RefCell::new(Vec::new()));
                let queue: BoundedQueue<u32> = BoundedQueue::new(Some(2), {
                    // Pause immediately so puts accumulate instead of draining
                    // before we've finished pushing.
                    noop_callback(log.clone())
                });
                queue.pause();
                queue.put(1);
                queue.put(2);
                queue.put(3);
                assert_eq!(queue.len(), 2);
                queue.resume();
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(*log.borrow(), vec![2, 3]);
            })
            .await;
    }

    #[tokio::test]
    async fn pause_prevents_draining_until_resumed() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let log = Rc::new(RefCell::new(Vec::new()));
                let queue = BoundedQueue::new(None, noop_callback(log.clone()));
                queue.pause();
                queue.put(1);
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(log.borrow().is_empty());

                queue.resume();
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(*log.borrow(), vec![1]);
            })
            .await;
    }

    #[tokio::test]
    async fn stop_halts_draining_permanently() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let log = Rc::new(RefCell::new(Vec::new()));
                let queue = BoundedQueue::new(None, noop_callback(log.clone()));
                queue.stop();
                queue.put(1);
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(log.borrow().is_empty());
                assert_eq!(queue.len(), 1);
            })
            .await;
    }
}
