//! Time utilities for fibers: sleeping and deadlines.
//!
//! - [`Driver::sleep`] and [`delay`] suspend a fiber for a duration
//! - [`timeout`] runs a fallible future with a deadline
//!
//! Both are built on the driver's delay watchers, so a pending sleep keeps
//! [`Driver::run`] alive.
//!
//! # Example: Sleep
//!
//! ```ignore
//! use std::time::Duration;
//!
//! driver.block_on({
//!     let driver = driver.clone();
//!     async move {
//!         driver.sleep(Duration::from_millis(50)).await?;
//!         Ok(())
//!     }
//! })?;
//! ```
//!
//! # Example: Cancellable delay
//!
//! ```ignore
//! use tickloop::time::delay;
//!
//! let source = CancellationSource::new(&driver);
//! let token = source.token();
//!
//! let waited = delay(&driver, Duration::from_secs(10), Some(&token)).await;
//! assert!(matches!(waited, Err(Error::Cancelled(_))));
//! ```

mod sleep;
pub mod timeout;

pub use sleep::Sleep;
pub use timeout::{Timeout, timeout};

use crate::cancellation::Cancellation;
use crate::driver::Driver;

use std::time::Duration;

/// Suspends for `duration`, or until `cancellation` is requested, in which
/// case the returned future fails with [`Error::Cancelled`](crate::Error::Cancelled).
pub fn delay(driver: &Driver, duration: Duration, cancellation: Option<&Cancellation>) -> Sleep {
    Sleep::new(driver, duration, cancellation)
}
