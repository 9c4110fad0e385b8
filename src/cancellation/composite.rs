use crate::cancellation::{Cancellation, CancellationSource};
use crate::driver::Driver;
use crate::future::SubscriptionId;

use std::ops::Deref;
use std::rc::Rc;

/// Token cancelled as soon as any of its inner tokens is, with the same
/// cause.
///
/// # Example
/// ```ignore
/// let shutdown = shutdown_source.token();
/// let deadline = TimeoutCancellation::new(&driver, Duration::from_secs(5));
/// let either = CompositeCancellation::new(&driver, [shutdown, (*deadline).clone()]);
/// ```
pub struct CompositeCancellation {
    token: Cancellation,
    subscriptions: Vec<(Cancellation, SubscriptionId)>,
}

impl CompositeCancellation {
    pub fn new<I>(driver: &Driver, tokens: I) -> Self
    where
        I: IntoIterator<Item = Cancellation>,
    {
        let source = Rc::new(CancellationSource::new(driver));
        let token = source.token();
        let mut subscriptions = Vec::new();

        for inner in tokens {
            if let Some(error) = inner.requested() {
                source.cancel_with(error);
                continue;
            }

            let source = source.clone();
            let id = inner.subscribe(move |error| source.cancel_with(error));
            subscriptions.push((inner, id));
        }

        Self {
            token,
            subscriptions,
        }
    }
}

impl Deref for CompositeCancellation {
    type Target = Cancellation;

    fn deref(&self) -> &Cancellation {
        &self.token
    }
}

impl Drop for CompositeCancellation {
    fn drop(&mut self) {
        for (inner, id) in self.subscriptions.drain(..) {
            inner.unsubscribe(id);
        }
    }
}
