//! Deadline for a fallible future.
//!
//! # Example
//!
//! ```ignore
//! use tickloop::time::timeout;
//! use std::time::Duration;
//!
//! let reply = timeout(&driver, Duration::from_millis(100), request).await;
//! assert!(matches!(reply, Err(Error::TimedOut(_))));
//! ```

use crate::driver::Driver;
use crate::error::Error;
use crate::time::Sleep;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Runs `future` with a deadline.
///
/// Resolves with the future's own result if it finishes within `duration`,
/// otherwise with [`Error::TimedOut`]. The inner future is dropped on
/// timeout.
pub fn timeout<T, F>(driver: &Driver, duration: Duration, future: F) -> Timeout<F>
where
    F: Future<Output = Result<T, Error>>,
{
    Timeout {
        future: Box::pin(future),
        sleep: Sleep::new(driver, duration, None),
        duration,
    }
}

/// Future returned by [`timeout`].
pub struct Timeout<F> {
    future: Pin<Box<F>>,
    sleep: Sleep,
    duration: Duration,
}

impl<T, F> Future for Timeout<F>
where
    F: Future<Output = Result<T, Error>>,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(result) = this.future.as_mut().poll(cx) {
            return Poll::Ready(result);
        }

        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Err(Error::TimedOut(this.duration))),
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }
}
