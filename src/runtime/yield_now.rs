use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspends the current fiber until the next tick.
///
/// The first poll wakes its own waker and returns `Pending`; since wakers
/// only queue the fiber, every other entry of the current tick runs before
/// the fiber resumes.
///
/// # Example
/// ```ignore
/// driver.spawn(async {
///     for chunk in work {
///         process(chunk);
///         yield_now().await;
///     }
///     Ok(())
/// });
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();

        Poll::Pending
    }
}
