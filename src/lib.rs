//! Single-threaded event loop with futures, cancellation, fibers and
//! backpressured pipelines.
//!
//! The crate is built around a [`Driver`]: a cooperative event loop that runs
//! deferred callbacks, timers, readiness watchers for file descriptors and
//! signal watchers in ticks. Everything else is layered on top of it.
//!
//! # Architecture
//!
//! - **Driver**: watcher registries, the timer heap, run/stop and error
//!   routing
//! - **Poller**: readiness backend used by the driver (`poll(2)` by default)
//! - **Fibers**: `async` blocks spawned on the driver, resumed only from its
//!   dispatch
//! - **FutureState / Future**: single-assignment results, awaitable from
//!   fibers, with completion-order combinators
//! - **Cancellation**: cooperative cancellation tokens, including timeouts
//! - **Pipeline**: single-producer, single-consumer sequences with
//!   backpressure
//! - **DriverBuilder**: fluent configuration of a driver
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tickloop::{Driver, pipeline};
//!
//! let driver = Driver::new();
//! let (source, mut values) = pipeline::channel(&driver);
//!
//! driver.spawn({
//!     let driver = driver.clone();
//!     async move {
//!         for n in 0..3 {
//!             driver.sleep(Duration::from_millis(10)).await?;
//!             source.emit(n).await?;
//!         }
//!         source.complete();
//!         Ok(())
//!     }
//! });
//!
//! let total = driver.block_on(async move {
//!     let mut total = 0;
//!     while let Some(n) = values.next().await? {
//!         total += n;
//!     }
//!     Ok(total)
//! })?;
//! ```

mod builder;
pub mod cancellation;
pub mod driver;
mod error;
pub mod future;
pub mod pipeline;
mod runtime;
pub mod time;
mod utils;

pub use builder::DriverBuilder;
pub use cancellation::{
    Cancellation, CancellationSource, CompositeCancellation, TimeoutCancellation,
};
pub use driver::{
    CallbackResult, Driver, DriverInfo, ErrorHandler, WatcherCount, WatcherId, WatcherKind,
};
pub use error::{CancelledError, CompositeError, Error};
pub use future::{Future, FutureIterator, FutureState, SubscriptionId};
pub use pipeline::{Pipeline, PipelineSource};
pub use runtime::{YieldNow, run, yield_now};
