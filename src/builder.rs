//! Fluent builder for Driver construction.
//!
//! Provides a builder pattern interface for choosing the readiness backend,
//! installing an error handler and seeding driver state before the loop
//! runs.

use crate::driver::poller::{PollPoller, Poller};
use crate::driver::{CallbackResult, Driver, ErrorHandler};
use crate::error::Error;

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// Builder for constructing [`Driver`] instances with fluent API.
///
/// # Example
/// ```ignore
/// let driver = DriverBuilder::new()
///     .error_handler(|_, err| {
///         log::error!("callback failed: {err}");
///         Ok(())
///     })
///     .state("config", Rc::new(config))
///     .build();
/// ```
pub struct DriverBuilder {
    poller: Option<Box<dyn Poller>>,
    error_handler: Option<ErrorHandler>,
    state: HashMap<String, Rc<dyn Any>>,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBuilder {
    /// Creates a builder for a driver using `poll(2)` and no error handler.
    ///
    /// # Returns
    /// A builder with default settings and empty driver state
    pub fn new() -> Self {
        Self {
            poller: None,
            error_handler: None,
            state: HashMap::new(),
        }
    }

    /// Uses `poller` as the readiness backend instead of [`PollPoller`].
    ///
    /// Every wait of the built driver goes through this backend, timer waits
    /// included.
    ///
    /// # Arguments
    /// * `poller` - The backend that waits for descriptor readiness
    pub fn poller(mut self, poller: impl Poller + 'static) -> Self {
        self.poller = Some(Box::new(poller));
        self
    }

    /// Installs the handler for errors returned by watcher callbacks.
    ///
    /// See [`Driver::set_error_handler`].
    ///
    /// # Arguments
    /// * `handler` - Called with each callback error; returning `Err` stops the loop
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Driver, Error) -> CallbackResult + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Stores `value` under `key` in the driver's state.
    ///
    /// A later call with the same key replaces the earlier value.
    ///
    /// # Arguments
    /// * `key` - Name used to look the value up with [`Driver::state`]
    /// * `value` - Shared value of any type
    pub fn state(mut self, key: impl Into<String>, value: Rc<dyn Any>) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    /// Builds and returns the configured [`Driver`].
    ///
    /// # Returns
    /// A stopped driver with no watchers, ready for [`Driver::run`]
    pub fn build(self) -> Driver {
        let poller = self
            .poller
            .unwrap_or_else(|| Box::new(PollPoller::new()));

        Driver::from_parts(poller, self.error_handler, self.state)
    }
}
