//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns the right to cancel; the [`Cancellation`]
//! tokens it hands out are passed to the operations that should observe it.
//! Cancellation is one-way and happens at most once. Callbacks subscribed on
//! a token are scheduled with [`Driver::defer`] when it happens, or right away
//! when subscribing to an already cancelled token.
//!
//! Two derived tokens are provided: [`TimeoutCancellation`] cancels itself
//! after a delay and [`CompositeCancellation`] follows the first of several
//! tokens.
//!
//! # Example
//!
//! ```ignore
//! let source = CancellationSource::new(&driver);
//! let token = source.token();
//!
//! let work = driver.spawn(async move {
//!     loop {
//!         token.throw_if_requested()?;
//!         step().await?;
//!     }
//! });
//!
//! source.cancel(None);
//! ```

mod composite;
mod timeout;

pub use composite::CompositeCancellation;
pub use timeout::TimeoutCancellation;

use crate::driver::{Driver, WeakDriver};
use crate::error::{CancelledError, Error};
use crate::future::SubscriptionId;

use log::trace;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::{Context, Waker};

type CancelCallback = Box<dyn FnOnce(CancelledError)>;

pub(crate) struct CancelState {
    driver: WeakDriver,
    requested: Option<CancelledError>,
    callbacks: BTreeMap<u64, CancelCallback>,
    next_id: u64,
}

/// Requests the cancellation once, then schedules every subscriber.
fn request(state: &RefCell<CancelState>, error: CancelledError) {
    let (callbacks, driver) = {
        let mut state = state.borrow_mut();
        if state.requested.is_some() {
            return;
        }

        state.requested = Some(error.clone());
        (std::mem::take(&mut state.callbacks), state.driver.upgrade())
    };

    trace!("cancellation requested with {} subscribers", callbacks.len());

    let Some(driver) = driver else {
        return;
    };

    for callback in callbacks.into_values() {
        let error = error.clone();
        driver.defer(move |_, _| {
            callback(error);
            Ok(())
        });
    }
}

/// Owner side of a cancellation.
pub struct CancellationSource {
    state: Rc<RefCell<CancelState>>,
}

impl CancellationSource {
    pub fn new(driver: &Driver) -> Self {
        Self {
            state: Rc::new(RefCell::new(CancelState {
                driver: driver.downgrade(),
                requested: None,
                callbacks: BTreeMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> Cancellation {
        Cancellation {
            state: Some(self.state.clone()),
        }
    }

    /// Requests cancellation, optionally recording what caused it.
    ///
    /// Only the first call has an effect.
    pub fn cancel(&self, reason: Option<Error>) {
        self.cancel_with(CancelledError::new(reason));
    }

    pub(crate) fn cancel_with(&self, error: CancelledError) {
        request(&self.state, error);
    }

    pub fn is_requested(&self) -> bool {
        self.state.borrow().requested.is_some()
    }
}

/// Token observing a [`CancellationSource`].
///
/// [`Cancellation::none`] (also the `Default`) is a token that is never
/// cancelled.
#[derive(Clone, Default)]
pub struct Cancellation {
    state: Option<Rc<RefCell<CancelState>>>,
}

impl Cancellation {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Calls `callback` once cancellation is requested.
    ///
    /// The callback is scheduled with [`Driver::defer`], also when the token
    /// is already cancelled.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(CancelledError) + 'static,
    {
        let Some(state) = &self.state else {
            return SubscriptionId(0);
        };

        let mut state = state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;

        match state.requested.clone() {
            Some(error) => {
                let driver = state.driver.upgrade();
                drop(state);

                if let Some(driver) = driver {
                    driver.defer(move |_, _| {
                        callback(error);
                        Ok(())
                    });
                }
            }
            None => {
                state.callbacks.insert(id, Box::new(callback));
            }
        }

        SubscriptionId(id)
    }

    /// Removes a subscription that has not been delivered yet.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some(state) = &self.state else {
            return;
        };

        let removed = state.borrow_mut().callbacks.remove(&id.0);
        drop(removed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested().is_some()
    }

    pub(crate) fn requested(&self) -> Option<CancelledError> {
        self.state
            .as_ref()
            .and_then(|state| state.borrow().requested.clone())
    }

    /// Returns [`Error::Cancelled`] if cancellation was requested.
    ///
    /// # Example
    /// ```ignore
    /// for item in items {
    ///     token.throw_if_requested()?;
    ///     handle(item).await?;
    /// }
    /// ```
    pub fn throw_if_requested(&self) -> Result<(), Error> {
        match self.requested() {
            Some(error) => Err(Error::Cancelled(error)),
            None => Ok(()),
        }
    }
}

/// Wakes a pending poll when a token is cancelled.
///
/// Shared by the futures that accept an optional cancellation; it subscribes
/// on first use and unsubscribes on drop.
pub(crate) struct CancelWaker {
    token: Cancellation,
    waker: Rc<RefCell<Option<Waker>>>,
    subscription: Option<SubscriptionId>,
}

impl CancelWaker {
    pub(crate) fn new(token: &Cancellation) -> Self {
        Self {
            token: token.clone(),
            waker: Rc::new(RefCell::new(None)),
            subscription: None,
        }
    }

    /// Fails if cancellation was requested; otherwise arranges for `cx` to be
    /// woken when it is.
    pub(crate) fn poll_cancelled(&mut self, cx: &mut Context<'_>) -> Result<(), Error> {
        self.token.throw_if_requested()?;

        if self.token.state.is_none() {
            return Ok(());
        }

        *self.waker.borrow_mut() = Some(cx.waker().clone());

        if self.subscription.is_none() {
            let slot = self.waker.clone();
            self.subscription = Some(self.token.subscribe(move |_| {
                let waker = slot.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }

        Ok(())
    }
}

impl Drop for CancelWaker {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.token.unsubscribe(id);
        }
    }
}
