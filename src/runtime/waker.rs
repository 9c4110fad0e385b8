//! Wakers for fibers.
//!
//! Waking a fiber never polls it. The waker only pushes the fiber's slot onto
//! the driver's [`ReadyQueue`]; the driver resumes it from its own dispatch in
//! the next tick.

use crate::runtime::queue::{ReadyQueue, Runnable};

use std::sync::Arc;
use std::task::{Wake, Waker};

/// Waker that re-queues one fiber on its driver.
pub(crate) struct TaskWaker {
    task: usize,
    queue: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(Runnable::Task(self.task));
    }
}

/// Creates the waker handed to a fiber while it is polled.
///
/// # Arguments
/// * `task` - The fiber's slot in the task slab
/// * `queue` - The ready queue of the driver that owns the fiber
///
/// # Returns
/// A waker that pushes the fiber onto `queue` when woken
pub(crate) fn make_waker(task: usize, queue: Arc<ReadyQueue>) -> Waker {
    Waker::from(Arc::new(TaskWaker { task, queue }))
}
