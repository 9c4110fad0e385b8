//! Single-assignment results.
//!
//! A [`FutureState`] is the write side: whoever owns it resolves it exactly
//! once, with a value or an error. Every [`Future`] obtained from it is a
//! read side: it can be awaited inside a fiber or observed with
//! [`Future::subscribe`].
//!
//! Subscribers are never called synchronously from `complete`/`error`.
//! Callbacks are scheduled with [`Driver::defer`] in subscription order and
//! awaiting fibers are woken into the driver's ready queue, so resolution
//! always takes effect from the loop's own dispatch.
//!
//! A failure must be observed. A state that was resolved with an error is
//! considered handled once any of its futures was awaited, subscribed to or
//! explicitly [ignored](Future::ignore). If the last handle goes away before
//! that, the error is escalated to the driver as [`Error::Unhandled`].
//!
//! # Example
//!
//! ```ignore
//! let state = FutureState::new(&driver);
//! let future = state.future();
//!
//! driver.delay(Duration::from_millis(10), move |_, _| {
//!     state.complete("ready");
//!     Ok(())
//! });
//!
//! assert_eq!(driver.block_on(async move { future.await })?, "ready");
//! ```

mod combinators;
mod iterator;

pub use combinators::{all, any, first, settle, some};
pub use iterator::{Consume, FutureIterator};

use crate::cancellation::{CancelWaker, Cancellation};
use crate::driver::{Driver, WeakDriver};
use crate::error::Error;

use log::warn;
use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Identifies a subscription on a [`Future`] or a
/// [`Cancellation`](crate::Cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

enum Subscriber<T> {
    Callback(Box<dyn FnOnce(Result<T, Error>)>),
    Waker(Waker),
}

struct Shared<T> {
    driver: WeakDriver,
    result: Option<Result<T, Error>>,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    next_id: u64,
    handled: bool,
}

impl<T> Shared<T> {
    fn next_subscription(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if self.handled {
            return;
        }

        if let Some(Err(error)) = self.result.take() {
            match self.driver.upgrade() {
                Some(driver) => driver.report_unhandled(error),
                None => warn!("future failed without being observed after its driver was dropped: {error}"),
            }
        }
    }
}

/// Rejects `FutureState<Future<_>>`: a future is never implicitly flattened
/// into its outer state.
fn is_future_type<T>() -> bool {
    let name = std::any::type_name::<T>();
    let base = std::any::type_name::<Future<()>>();
    let path = base.split('<').next().unwrap_or(base);

    name.strip_prefix(path)
        .is_some_and(|rest| rest.starts_with('<'))
}

/// Write side of a single-assignment result.
pub struct FutureState<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: Clone + 'static> FutureState<T> {
    /// Creates an unresolved state whose subscribers are scheduled on
    /// `driver`.
    pub fn new(driver: &Driver) -> Self {
        Self::detached(driver.downgrade())
    }

    pub(crate) fn detached(driver: WeakDriver) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                driver,
                result: None,
                subscribers: Vec::new(),
                next_id: 0,
                handled: false,
            })),
        }
    }

    /// Returns a read handle. Any number of handles may be taken.
    pub fn future(&self) -> Future<T> {
        Future {
            shared: self.shared.clone(),
            waiter: None,
        }
    }

    /// Resolves the state with `value`.
    ///
    /// # Panics
    /// Panics if the state is already resolved, or if `T` is itself a
    /// [`Future`].
    pub fn complete(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolves the state with `error`.
    ///
    /// # Panics
    /// Panics if the state is already resolved.
    pub fn error(&self, error: Error) {
        self.resolve(Err(error));
    }

    /// Resolves the state with `result`.
    ///
    /// # Panics
    /// Panics if the state is already resolved, or if `T` is itself a
    /// [`Future`].
    pub fn resolve(&self, result: Result<T, Error>) {
        if result.is_ok() && is_future_type::<T>() {
            panic!("cannot complete a future state with another future; await it first");
        }

        let (subscribers, driver) = {
            let mut shared = self.shared.borrow_mut();
            if shared.result.is_some() {
                panic!("future state has already been completed");
            }

            shared.result = Some(result.clone());
            (
                std::mem::take(&mut shared.subscribers),
                shared.driver.upgrade(),
            )
        };

        for (_, subscriber) in subscribers {
            match subscriber {
                Subscriber::Waker(waker) => waker.wake(),
                Subscriber::Callback(callback) => {
                    let Some(driver) = &driver else {
                        continue;
                    };

                    let result = result.clone();
                    driver.defer(move |_, _| {
                        callback(result);
                        Ok(())
                    });
                }
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.shared.borrow().result.is_some()
    }
}

/// Read side of a single-assignment result.
///
/// Awaiting a `Future` inside a fiber yields `Result<T, Error>`. Cloning is
/// cheap; every clone observes the same result.
pub struct Future<T> {
    shared: Rc<RefCell<Shared<T>>>,
    /// Waker subscription registered by the last pending poll.
    waiter: Option<SubscriptionId>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            waiter: None,
        }
    }
}

impl<T: Clone + 'static> Future<T> {
    /// A future already resolved with `value`.
    pub fn complete(driver: &Driver, value: T) -> Self {
        let state = FutureState::new(driver);
        state.complete(value);
        state.future()
    }

    /// A future already failed with `error`.
    pub fn error(driver: &Driver, error: Error) -> Self {
        let state = FutureState::new(driver);
        state.error(error);
        state.future()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.borrow().result.is_some()
    }

    /// Driver the future delivers on, if it is still alive.
    pub fn driver(&self) -> Option<Driver> {
        self.shared.borrow().driver.upgrade()
    }

    pub(crate) fn weak_driver(&self) -> WeakDriver {
        self.shared.borrow().driver.clone()
    }

    /// Result of a resolved future, without waiting.
    pub(crate) fn result(&self) -> Option<Result<T, Error>> {
        let mut shared = self.shared.borrow_mut();
        shared.handled = true;
        shared.result.clone()
    }

    /// Calls `callback` with the result once the future resolves.
    ///
    /// The callback always runs from a deferred watcher, even when the future
    /// is already resolved. Subscribing marks the future as handled.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(Result<T, Error>) + 'static,
    {
        let mut shared = self.shared.borrow_mut();
        shared.handled = true;
        let id = shared.next_subscription();

        match shared.result.clone() {
            Some(result) => {
                let driver = shared.driver.upgrade();
                drop(shared);

                if let Some(driver) = driver {
                    driver.defer(move |_, _| {
                        callback(result);
                        Ok(())
                    });
                }
            }
            None => shared
                .subscribers
                .push((id, Subscriber::Callback(Box::new(callback)))),
        }

        id
    }

    /// Removes a subscription that has not been delivered yet.
    ///
    /// A callback that was already scheduled still runs.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = {
            let mut shared = self.shared.borrow_mut();
            shared
                .subscribers
                .iter()
                .position(|(sid, _)| *sid == id)
                .map(|index| shared.subscribers.remove(index))
        };

        drop(removed);
    }

    /// Marks the future as handled, so a failure is not escalated.
    pub fn ignore(&self) {
        self.shared.borrow_mut().handled = true;
    }

    /// A future resolved with `f` applied to this future's value.
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, Error> + 'static,
    {
        let state = FutureState::detached(self.weak_driver());
        let future = state.future();

        self.subscribe(move |result| state.resolve(result.and_then(f)));

        future
    }

    /// A future that recovers from this future's error with `f`.
    pub fn catch<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Result<T, Error> + 'static,
    {
        let state = FutureState::detached(self.weak_driver());
        let future = state.future();

        self.subscribe(move |result| state.resolve(result.or_else(f)));

        future
    }

    /// A future that runs `f` once this future resolves, then resolves with
    /// the same result unless `f` fails.
    pub fn finally<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce() -> Result<(), Error> + 'static,
    {
        let state = FutureState::detached(self.weak_driver());
        let future = state.future();

        self.subscribe(move |result| {
            let result = match f() {
                Ok(()) => result,
                Err(error) => Err(error),
            };
            state.resolve(result);
        });

        future
    }

    /// Awaits this future unless `cancellation` is requested first, in which
    /// case the await fails with [`Error::Cancelled`]. The future itself keeps
    /// running.
    pub fn cancellable(&self, cancellation: &Cancellation) -> Cancellable<T> {
        Cancellable {
            future: self.clone(),
            cancel: CancelWaker::new(cancellation),
        }
    }

    /// Iterates `futures` in completion order, keyed by position.
    pub fn iterate<I>(futures: I) -> FutureIterator<usize, T>
    where
        I: IntoIterator<Item = Future<T>>,
    {
        let iterator = FutureIterator::new();

        for (index, future) in futures.into_iter().enumerate() {
            iterator.enqueue(future, index);
        }
        iterator.complete();

        iterator
    }
}

impl<T: Clone + 'static> std::future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut shared = this.shared.borrow_mut();
        shared.handled = true;

        if let Some(result) = &shared.result {
            return Poll::Ready(result.clone());
        }

        let registered = this
            .waiter
            .and_then(|id| shared.subscribers.iter().position(|(sid, _)| *sid == id));

        if let Some(index) = registered {
            if let Subscriber::Waker(waker) = &mut shared.subscribers[index].1 {
                waker.clone_from(cx.waker());
                return Poll::Pending;
            }
        }

        let id = shared.next_subscription();
        shared
            .subscribers
            .push((id, Subscriber::Waker(cx.waker().clone())));
        this.waiter = Some(id);

        Poll::Pending
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        let Some(id) = self.waiter else {
            return;
        };

        if let Ok(mut shared) = self.shared.try_borrow_mut() {
            shared.subscribers.retain(|(sid, _)| *sid != id);
        }
    }
}

/// Future returned by [`Future::cancellable`].
pub struct Cancellable<T> {
    future: Future<T>,
    cancel: CancelWaker,
}

impl<T: Clone + 'static> std::future::Future for Cancellable<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(result) = Pin::new(&mut this.future).poll(cx) {
            return Poll::Ready(result);
        }

        match this.cancel.poll_cancelled(cx) {
            Ok(()) => Poll::Pending,
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}
