use crate::cancellation::{Cancellation, CancellationSource};
use crate::driver::{Driver, WatcherId, WeakDriver};
use crate::error::Error;

use std::ops::Deref;
use std::time::Duration;

/// Token that cancels itself with [`Error::TimedOut`] after a delay.
///
/// The timer does not keep the driver running. Dropping the
/// `TimeoutCancellation` cancels the timer; tokens cloned from it before
/// that are never cancelled by it.
///
/// # Example
/// ```ignore
/// let timeout = TimeoutCancellation::new(&driver, Duration::from_secs(1));
/// let body = response.cancellable(&timeout).await?;
/// ```
pub struct TimeoutCancellation {
    token: Cancellation,
    driver: WeakDriver,
    watcher: WatcherId,
}

impl TimeoutCancellation {
    pub fn new(driver: &Driver, timeout: Duration) -> Self {
        let source = CancellationSource::new(driver);
        let token = source.token();

        let watcher = driver.delay(timeout, move |_, _| {
            source.cancel(Some(Error::TimedOut(timeout)));
            Ok(())
        });
        driver.unreference(watcher).ok();

        Self {
            token,
            driver: driver.downgrade(),
            watcher,
        }
    }
}

impl Deref for TimeoutCancellation {
    type Target = Cancellation;

    fn deref(&self) -> &Cancellation {
        &self.token
    }
}

impl Drop for TimeoutCancellation {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.upgrade() {
            driver.cancel(self.watcher);
        }
    }
}
