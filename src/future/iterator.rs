use crate::cancellation::{CancelWaker, Cancellation};
use crate::error::Error;
use crate::future::{Future, FutureState};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct IterState<K, T> {
    /// Enqueued futures that have not resolved yet.
    pending: usize,
    /// Resolved futures waiting to be consumed, in completion order.
    items: VecDeque<(K, Future<T>)>,
    terminal: Option<Result<(), Error>>,
    waiter: Option<Waker>,
    consuming: bool,
}

/// Yields enqueued futures in the order they resolve.
///
/// Producers [`enqueue`](Self::enqueue) futures with a key and finally call
/// [`complete`](Self::complete) or [`error`](Self::error). A single consumer
/// drains it with [`consume`](Self::consume).
///
/// # Example
/// ```ignore
/// let iterator = FutureIterator::new();
/// iterator.enqueue(slow, "slow");
/// iterator.enqueue(fast, "fast");
/// iterator.complete();
///
/// while let Some((key, future)) = iterator.consume(None).await? {
///     println!("{key}: {:?}", future.await);
/// }
/// ```
pub struct FutureIterator<K, T> {
    state: Rc<RefCell<IterState<K, T>>>,
}

impl<K, T> Clone for FutureIterator<K, T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K: 'static, T: Clone + 'static> Default for FutureIterator<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, T: Clone + 'static> FutureIterator<K, T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(IterState {
                pending: 0,
                items: VecDeque::new(),
                terminal: None,
                waiter: None,
                consuming: false,
            })),
        }
    }

    /// Adds `future`; it is yielded under `key` once it resolves.
    ///
    /// # Panics
    /// Panics if the iterator was already completed or failed.
    pub fn enqueue(&self, future: Future<T>, key: K) {
        {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                panic!("cannot enqueue into a completed future iterator");
            }
            state.pending += 1;
        }

        let state = self.state.clone();
        let driver = future.weak_driver();

        // The subscriber lives inside the future's own state, so it must not
        // hold that future; a copy is rebuilt from the delivered result.
        future.subscribe(move |result| {
            let settled = FutureState::detached(driver);
            settled.resolve(result);
            let resolved = settled.future();
            resolved.ignore();

            let waiter = {
                let mut state = state.borrow_mut();
                state.pending -= 1;
                state.items.push_back((key, resolved));
                state.waiter.take()
            };

            if let Some(waker) = waiter {
                waker.wake();
            }
        });
    }

    /// Ends the iteration once every enqueued future has been yielded.
    ///
    /// # Panics
    /// Panics if the iterator was already completed or failed.
    pub fn complete(&self) {
        self.finish(Ok(()));
    }

    /// Fails the iteration: once the already resolved futures are consumed,
    /// `consume` returns `error`.
    ///
    /// # Panics
    /// Panics if the iterator was already completed or failed.
    pub fn error(&self, error: Error) {
        self.finish(Err(error));
    }

    fn finish(&self, terminal: Result<(), Error>) {
        let waiter = {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                panic!("future iterator has already been completed");
            }
            state.terminal = Some(terminal);
            state.waiter.take()
        };

        if let Some(waker) = waiter {
            waker.wake();
        }
    }

    /// Waits for the next resolved future.
    ///
    /// Resolves to `Ok(None)` after the last one. With a `cancellation`, the
    /// wait fails with [`Error::Cancelled`] once it is requested; the
    /// iterator itself is left intact.
    ///
    /// # Panics
    /// The returned future panics if polled while another `consume` of the
    /// same iterator is still waiting.
    pub fn consume(&self, cancellation: Option<&Cancellation>) -> Consume<K, T> {
        Consume {
            state: self.state.clone(),
            cancel: cancellation.map(CancelWaker::new),
            started: false,
            finished: false,
        }
    }
}

/// Future returned by [`FutureIterator::consume`].
pub struct Consume<K, T> {
    state: Rc<RefCell<IterState<K, T>>>,
    cancel: Option<CancelWaker>,
    started: bool,
    finished: bool,
}

impl<K, T> Consume<K, T> {
    fn finish<R>(&mut self, output: R) -> Poll<R> {
        self.finished = true;

        let mut state = self.state.borrow_mut();
        state.consuming = false;
        state.waiter = None;

        Poll::Ready(output)
    }
}

impl<K, T> std::future::Future for Consume<K, T> {
    type Output = Result<Option<(K, Future<T>)>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.finished {
            panic!("`Consume` polled after completion");
        }

        if !this.started {
            let mut state = this.state.borrow_mut();
            if state.consuming {
                panic!("concurrent consume of the same future iterator");
            }
            state.consuming = true;
            drop(state);
            this.started = true;
        }

        let ready = {
            let mut state = this.state.borrow_mut();

            if let Some(item) = state.items.pop_front() {
                Some(Ok(Some(item)))
            } else {
                match &state.terminal {
                    Some(Err(error)) => Some(Err(error.clone())),
                    Some(Ok(())) if state.pending == 0 => Some(Ok(None)),
                    _ => None,
                }
            }
        };

        if let Some(output) = ready {
            return this.finish(output);
        }

        if let Some(cancel) = &mut this.cancel {
            if let Err(error) = cancel.poll_cancelled(cx) {
                return this.finish(Err(error));
            }
        }

        this.state.borrow_mut().waiter = Some(cx.waker().clone());

        Poll::Pending
    }
}

impl<K, T> Drop for Consume<K, T> {
    fn drop(&mut self) {
        if !self.started || self.finished {
            return;
        }

        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.consuming = false;
            state.waiter = None;
        }
    }
}
