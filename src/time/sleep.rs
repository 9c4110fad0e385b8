use crate::cancellation::{CancelWaker, Cancellation};
use crate::driver::{Driver, WatcherId, WeakDriver};
use crate::error::Error;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Future that resolves after a delay.
///
/// The delay watcher is registered on first poll and cancelled if the
/// future is dropped early. While it is pending it keeps the driver running.
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    driver: WeakDriver,
    duration: Duration,
    watcher: Option<WatcherId>,
    fired: Rc<Cell<bool>>,
    waker: Rc<RefCell<Option<Waker>>>,
    cancel: Option<CancelWaker>,
}

impl Sleep {
    pub(crate) fn new(
        driver: &Driver,
        duration: Duration,
        cancellation: Option<&Cancellation>,
    ) -> Self {
        Self {
            driver: driver.downgrade(),
            duration,
            watcher: None,
            fired: Rc::new(Cell::new(false)),
            waker: Rc::new(RefCell::new(None)),
            cancel: cancellation.map(CancelWaker::new),
        }
    }

    fn register(&mut self) -> Result<(), Error> {
        let driver = self.driver.upgrade().ok_or(Error::Unresolved)?;

        let fired = self.fired.clone();
        let waker = self.waker.clone();

        self.watcher = Some(driver.delay(self.duration, move |_, _| {
            fired.set(true);

            let waker = waker.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }

            Ok(())
        }));

        Ok(())
    }
}

impl Future for Sleep {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.fired.get() {
            return Poll::Ready(Ok(()));
        }

        if let Some(cancel) = &mut this.cancel {
            if let Err(error) = cancel.poll_cancelled(cx) {
                return Poll::Ready(Err(error));
            }
        }

        if this.watcher.is_none() {
            if let Err(error) = this.register() {
                return Poll::Ready(Err(error));
            }
        }

        *this.waker.borrow_mut() = Some(cx.waker().clone());

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if self.fired.get() {
            return;
        }

        if let (Some(watcher), Some(driver)) = (self.watcher, self.driver.upgrade()) {
            driver.cancel(watcher);
        }
    }
}

impl Driver {
    /// Returns a future resolving after `duration`.
    ///
    /// # Example
    /// ```ignore
    /// driver.spawn({
    ///     let driver = driver.clone();
    ///     async move {
    ///         driver.sleep(Duration::from_millis(100)).await?;
    ///         Ok(())
    ///     }
    /// });
    /// ```
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self, duration, None)
    }
}
