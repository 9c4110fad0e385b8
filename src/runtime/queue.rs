//! FIFO of work that is ready for the next tick.
//!
//! Deferred watchers are pushed here when the driver activates them and
//! fibers are pushed here by their wakers. At the start of a tick the driver
//! takes the whole queue as that tick's batch, so anything pushed while the
//! batch runs waits for the following tick.

use crate::driver::WatcherId;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One unit of work in the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Runnable {
    /// A deferred watcher.
    Watcher(WatcherId),
    /// A fiber, by its slot in the driver's task slab.
    Task(usize),
}

/// Ready queue shared between the driver and the wakers of its fibers.
///
/// Wakers must be `Send + Sync`, hence the mutex even though the driver
/// itself never leaves its thread.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<Runnable>>,
}

impl ReadyQueue {
    /// Creates an empty ready queue.
    ///
    /// # Returns
    /// A queue with no pending work, ready to be shared behind an `Arc`
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Runnable>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues work for the next tick.
    ///
    /// Pushes to the back of the queue, so runnables dispatch in the order
    /// they were pushed. Callable from a waker on any thread.
    ///
    /// # Arguments
    /// * `runnable` - The deferred watcher or fiber to run
    pub(crate) fn push(&self, runnable: Runnable) {
        self.lock().push_back(runnable);
    }

    /// Takes every queued runnable, leaving the queue empty for the next tick.
    ///
    /// Anything pushed after this call belongs to the following batch.
    ///
    /// # Returns
    /// The current batch in FIFO order, possibly empty
    pub(crate) fn take_batch(&self) -> VecDeque<Runnable> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts the unprocessed tail of an aborted batch back in front.
    ///
    /// The tail keeps its order and stays ahead of anything pushed while the
    /// batch was running.
    ///
    /// # Arguments
    /// * `rest` - The runnables the batch did not reach
    pub(crate) fn requeue(&self, rest: impl DoubleEndedIterator<Item = Runnable>) {
        let mut queue = self.lock();
        for runnable in rest.rev() {
            queue.push_front(runnable);
        }
    }

    /// Checks whether any work is waiting.
    ///
    /// # Returns
    /// true if nothing is queued for the next tick
    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
