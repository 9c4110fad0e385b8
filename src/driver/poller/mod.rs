//! Readiness polling backends.
//!
//! The driver owns timers, deferred callbacks and watcher bookkeeping itself;
//! the only piece that differs between operating-system multiplexers is "wait
//! until one of these descriptors is ready, or until the deadline". That piece
//! is the [`Poller`] trait.
//!
//! [`PollPoller`] is the portable `poll(2)` implementation used by default.
//! Wrappers around other notification facilities plug in through
//! [`DriverBuilder::poller`](crate::DriverBuilder::poller).

mod poll;

pub use poll::PollPoller;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Interest in the readiness of one file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: RawFd,
    pub read: bool,
    pub write: bool,
}

/// Readiness reported for one file descriptor.
///
/// Error and hang-up conditions are reported as both readable and writable so
/// the watcher callback gets a chance to observe them through its own I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// A readiness multiplexer.
pub trait Poller {
    /// Waits until at least one interest is ready or `timeout` elapses.
    ///
    /// `None` waits without a deadline. Ready descriptors are appended to
    /// `events` (which the caller clears). An interrupted wait returns
    /// `Ok(())` with no events.
    fn poll(
        &mut self,
        interests: &[Interest],
        timeout: Option<Duration>,
        events: &mut Vec<Event>,
    ) -> io::Result<()>;
}
