//! Backpressured asynchronous sequences.
//!
//! A [`PipelineSource`] emits values one at a time into a [`Pipeline`]. Each
//! [`emit`](PipelineSource::emit) returns a future that resolves only when the
//! consumer has retrieved that value, so a producer awaiting its emits never
//! runs ahead of the consumer by more than one value.
//!
//! The sequence ends with [`complete`](PipelineSource::complete) (optionally
//! carrying a return value) or [`fail`](PipelineSource::fail). Both are
//! terminal: the consumer sees the end marker or the error on every later
//! [`next`](Pipeline::next).
//!
//! A consumer that loses interest calls [`dispose`](Pipeline::dispose), or
//! simply drops the pipeline. Every pending emit then fails with
//! [`Error::Disposed`], which releases the producer.
//!
//! # Example
//!
//! ```ignore
//! let (source, mut pipeline) = pipeline::channel(&driver);
//!
//! driver.spawn(async move {
//!     for n in 1..=3 {
//!         source.emit(n).await?;
//!     }
//!     source.complete();
//!     Ok(())
//! });
//!
//! driver.block_on(async move {
//!     while let Some(n) = pipeline.next().await? {
//!         println!("{n}");
//!     }
//!     Ok(())
//! })?;
//! ```

mod operators;

use crate::driver::{Driver, WeakDriver};
use crate::error::Error;
use crate::future::{Future, FutureState};

use futures::Stream;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Channel<T, R> {
    driver: WeakDriver,
    /// Emitted values with the state resolved when each one is retrieved.
    values: VecDeque<(T, FutureState<()>)>,
    terminal: Option<Result<R, Error>>,
    disposed: bool,
    consumer: Option<Waker>,
}

type SharedChannel<T, R> = Rc<RefCell<Channel<T, R>>>;

/// Creates a connected source and pipeline with no return value.
pub fn channel<T: 'static>(driver: &Driver) -> (PipelineSource<T>, Pipeline<T>) {
    channel_with_return(driver)
}

/// Creates a connected source and pipeline whose completion carries a value
/// of type `R`, available through [`Pipeline::get_return`].
pub fn channel_with_return<T: 'static, R: 'static>(
    driver: &Driver,
) -> (PipelineSource<T, R>, Pipeline<T, R>) {
    channel_on(driver.downgrade())
}

fn channel_on<T: 'static, R: 'static>(
    driver: WeakDriver,
) -> (PipelineSource<T, R>, Pipeline<T, R>) {
    let channel = Rc::new(RefCell::new(Channel {
        driver,
        values: VecDeque::new(),
        terminal: None,
        disposed: false,
        consumer: None,
    }));

    let source = PipelineSource {
        handle: Rc::new(SourceHandle {
            channel: channel.clone(),
        }),
    };
    let pipeline = Pipeline {
        channel,
        done: false,
    };

    (source, pipeline)
}

/// Fails the pipeline when the last source clone is dropped without
/// completing it.
struct SourceHandle<T, R> {
    channel: SharedChannel<T, R>,
}

impl<T, R> Drop for SourceHandle<T, R> {
    fn drop(&mut self) {
        let waker = {
            let Ok(mut channel) = self.channel.try_borrow_mut() else {
                return;
            };

            if channel.terminal.is_some() || channel.disposed {
                return;
            }

            channel.terminal = Some(Err(Error::SourceDropped));
            channel.consumer.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Producer side of a pipeline. Clones emit into the same pipeline.
pub struct PipelineSource<T, R = ()> {
    handle: Rc<SourceHandle<T, R>>,
}

impl<T, R> Clone for PipelineSource<T, R> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T: 'static, R: 'static> PipelineSource<T, R> {
    fn channel(&self) -> &SharedChannel<T, R> {
        &self.handle.channel
    }

    /// Emits `value`. The returned future resolves once the consumer has
    /// retrieved it, or fails with [`Error::Disposed`] if the consumer is
    /// disposed first.
    ///
    /// The future does not need to be awaited; an unobserved failure is not
    /// escalated.
    ///
    /// # Panics
    /// Panics if the pipeline was already completed or failed.
    pub fn emit(&self, value: T) -> Future<()> {
        let mut channel = self.channel().borrow_mut();

        if channel.terminal.is_some() {
            panic!("cannot emit into a completed pipeline");
        }

        let state = FutureState::detached(channel.driver.clone());
        let future = state.future();
        future.ignore();

        if channel.disposed {
            drop(channel);
            state.error(Error::Disposed);
            drop(value);
            return future;
        }

        channel.values.push_back((value, state));
        let waker = channel.consumer.take();
        drop(channel);

        if let Some(waker) = waker {
            waker.wake();
        }

        future
    }

    /// Completes the pipeline with `value` as its return value.
    ///
    /// # Panics
    /// Panics if the pipeline was already completed or failed.
    pub fn complete_with(&self, value: R) {
        self.finish(Ok(value));
    }

    /// Fails the pipeline; the consumer receives `error` after the values
    /// already emitted.
    ///
    /// # Panics
    /// Panics if the pipeline was already completed or failed.
    pub fn fail(&self, error: Error) {
        self.finish(Err(error));
    }

    fn finish(&self, terminal: Result<R, Error>) {
        let waker = {
            let mut channel = self.channel().borrow_mut();
            if channel.terminal.is_some() {
                panic!("pipeline has already been completed");
            }

            channel.terminal = Some(terminal);
            channel.consumer.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// `true` once the pipeline was completed or failed.
    pub fn is_complete(&self) -> bool {
        self.channel().borrow().terminal.is_some()
    }

    /// `true` once the consumer was disposed.
    pub fn is_disposed(&self) -> bool {
        self.channel().borrow().disposed
    }
}

impl<T: 'static, R: Default + 'static> PipelineSource<T, R> {
    /// Completes the pipeline with the default return value.
    ///
    /// # Panics
    /// Panics if the pipeline was already completed or failed.
    pub fn complete(&self) {
        self.complete_with(R::default());
    }
}

/// Consumer side of a pipeline.
///
/// There is exactly one consumer: `next` takes `&mut self`, so two pulls can
/// never wait at the same time.
pub struct Pipeline<T, R = ()> {
    channel: SharedChannel<T, R>,
    /// Set once the `Stream` implementation yielded its final item.
    done: bool,
}

impl<T: 'static, R: 'static> Pipeline<T, R> {
    /// Retrieves the next value, waiting for the producer if needed.
    ///
    /// Resolves to `Ok(None)` once the pipeline is complete and to the
    /// failure once it failed, on every later call as well.
    ///
    /// # Errors
    /// The producer's failure, [`Error::SourceDropped`], or
    /// [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn next(&mut self) -> Next<'_, T, R> {
        Next { pipeline: self }
    }

    fn poll_value(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<T>, Error>> {
        let mut channel = self.channel.borrow_mut();

        if channel.disposed {
            return Poll::Ready(Err(Error::Disposed));
        }

        if let Some((value, state)) = channel.values.pop_front() {
            drop(channel);
            state.complete(());
            return Poll::Ready(Ok(Some(value)));
        }

        match &channel.terminal {
            Some(Ok(_)) => Poll::Ready(Ok(None)),
            Some(Err(error)) => Poll::Ready(Err(error.clone())),
            None => {
                channel.consumer = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    /// Stops consuming. Pending and future emits fail with
    /// [`Error::Disposed`]. Also done on drop.
    pub fn dispose(&mut self) {
        dispose(&self.channel);
    }

    pub fn is_disposed(&self) -> bool {
        self.channel.borrow().disposed
    }

    pub(crate) fn weak_driver(&self) -> WeakDriver {
        self.channel.borrow().driver.clone()
    }
}

impl<T: 'static, R: Clone + 'static> Pipeline<T, R> {
    /// The return value the producer completed with, once complete.
    pub fn get_return(&self) -> Option<R> {
        match &self.channel.borrow().terminal {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T, R> Drop for Pipeline<T, R> {
    fn drop(&mut self) {
        dispose(&self.channel);
    }
}

fn dispose<T, R>(channel: &RefCell<Channel<T, R>>) {
    let pending = {
        let Ok(mut channel) = channel.try_borrow_mut() else {
            return;
        };

        if channel.disposed {
            return;
        }

        channel.disposed = true;
        channel.consumer = None;
        std::mem::take(&mut channel.values)
    };

    for (value, state) in pending {
        drop(value);
        state.error(Error::Disposed);
    }
}

/// Future returned by [`Pipeline::next`].
pub struct Next<'a, T, R> {
    pipeline: &'a mut Pipeline<T, R>,
}

impl<T: 'static, R: 'static> std::future::Future for Next<'_, T, R> {
    type Output = Result<Option<T>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().pipeline.poll_value(cx)
    }
}

impl<T: 'static, R: 'static> Stream for Pipeline<T, R> {
    type Item = Result<T, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.poll_value(cx) {
            Poll::Ready(Ok(Some(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Ok(None)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(error)) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
