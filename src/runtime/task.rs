//! Fibers: `async` blocks driven by the event loop.
//!
//! A fiber is stored in the driver's task slab and polled only from the
//! driver's dispatch of the ready queue. It suspends at `.await` points; its
//! waker re-queues it, so it resumes in a later tick, never reentrantly.
//!
//! # Spawning
//!
//! ```ignore
//! let driver = Driver::new();
//!
//! let answer = driver.spawn(async {
//!     Ok(42)
//! });
//!
//! let doubled = driver.spawn(async move {
//!     Ok(answer.await? * 2)
//! });
//!
//! assert_eq!(driver.block_on(async move { doubled.await })?, 84);
//! ```

use crate::driver::Driver;
use crate::error::Error;
use crate::future::{Future, FutureState};
use crate::runtime::queue::Runnable;
use crate::runtime::waker::make_waker;

use log::trace;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A spawned fiber, type-erased.
pub(crate) type Task = Pin<Box<dyn std::future::Future<Output = ()>>>;

impl Driver {
    /// Spawns `future` as a fiber and returns a [`Future`] bound to its
    /// result.
    ///
    /// The fiber is first polled in the next tick. An `Err` result fails the
    /// returned future; if nothing observes that failure it is escalated to
    /// the error handler.
    ///
    /// A pending fiber is owned by the driver, so a fiber that captures a
    /// strong [`Driver`] clone keeps the driver alive until it finishes.
    /// Fibers the crate creates itself only hold weak handles. A fiber that
    /// panics is dropped and its slot freed before the panic leaves
    /// [`Driver::run`].
    ///
    /// # Example
    /// ```ignore
    /// let handle = driver.spawn(async {
    ///     driver.sleep(Duration::from_millis(10)).await?;
    ///     Ok("done")
    /// });
    /// ```
    pub fn spawn<T, F>(&self, future: F) -> Future<T>
    where
        T: Clone + 'static,
        F: std::future::Future<Output = Result<T, Error>> + 'static,
    {
        let state = FutureState::new(self);
        let handle = state.future();

        let task: Task = Box::pin(async move {
            state.resolve(future.await);
        });

        let (id, live) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            (tasks.insert(Some(task)), tasks.len())
        };
        self.inner.ready.push(Runnable::Task(id));

        trace!("spawned fiber {id}, {live} live");

        handle
    }

    /// Polls one fiber. Stale or currently running slots are skipped.
    pub(crate) fn poll_task(&self, id: usize) {
        let task = self
            .inner
            .tasks
            .borrow_mut()
            .get_mut(id)
            .and_then(Option::take);

        let Some(mut task) = task else {
            return;
        };
        let mut slot = SlotGuard {
            driver: self,
            id,
            armed: true,
        };

        let waker = make_waker(id, self.inner.ready.clone());
        let mut cx = Context::from_waker(&waker);

        let poll = task.as_mut().poll(&mut cx);
        slot.armed = false;

        match poll {
            Poll::Pending => {
                let leftover = {
                    let mut tasks = self.inner.tasks.borrow_mut();
                    match tasks.get_mut(id) {
                        Some(slot) if slot.is_none() => {
                            *slot = Some(task);
                            None
                        }
                        _ => Some(task),
                    }
                };

                drop(leftover);
            }
            Poll::Ready(()) => {
                let finished = self.inner.tasks.borrow_mut().remove(id);
                drop(finished);
                drop(task);

                trace!("fiber {id} finished");
            }
        }
    }

    /// Spawns `future`, runs the loop until it resolves and returns its
    /// result.
    ///
    /// The loop stops one tick after the future resolves. Watchers that are
    /// still registered stay registered for a later `run`.
    ///
    /// # Errors
    /// The future's own error; a callback error that no handler absorbed; or
    /// [`Error::Unresolved`] when the loop runs out of work first.
    ///
    /// # Panics
    /// Panics if the driver is already running.
    ///
    /// # Example
    /// ```ignore
    /// let driver = Driver::new();
    /// let value = driver.block_on(async { Ok(1 + 1) })?;
    /// assert_eq!(value, 2);
    /// ```
    pub fn block_on<T, F>(&self, future: F) -> Result<T, Error>
    where
        T: Clone + 'static,
        F: std::future::Future<Output = Result<T, Error>> + 'static,
    {
        let handle = self.spawn(future);

        let driver = self.downgrade();
        handle.subscribe(move |_| {
            if let Some(driver) = driver.upgrade() {
                driver.stop();
            }
        });

        self.run()?;

        handle.result().unwrap_or(Err(Error::Unresolved))
    }
}

/// Frees a fiber's slot when polling it unwinds.
struct SlotGuard<'a> {
    driver: &'a Driver,
    id: usize,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Ok(mut tasks) = self.driver.inner.tasks.try_borrow_mut() {
            tasks.remove(self.id);
        }
    }
}

/// Creates a driver, defers `bootstrap` on it and runs it to completion.
///
/// # Example
/// ```ignore
/// tickloop::run(|driver, _| {
///     driver.delay(Duration::from_millis(5), |_, _| Ok(()));
///     Ok(())
/// })?;
/// ```
pub fn run<F>(bootstrap: F) -> Result<(), Error>
where
    F: FnOnce(&Driver, crate::WatcherId) -> crate::CallbackResult + 'static,
{
    Driver::new().run_with(bootstrap)
}
