use crate::driver::Driver;
use crate::error::Error;

use std::fmt;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Identifier handed out for every registered watcher.
///
/// Identifiers are never reused by the driver that issued them, which is how
/// the driver tells an already cancelled watcher apart from one that never
/// existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// The family a watcher belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Defer,
    Delay(Duration),
    Repeat(Duration),
    Readable(RawFd),
    Writable(RawFd),
    Signal(i32),
}

impl WatcherKind {
    pub(crate) fn is_timer(&self) -> bool {
        matches!(self, Self::Delay(_) | Self::Repeat(_))
    }

    pub(crate) fn is_one_shot(&self) -> bool {
        matches!(self, Self::Defer | Self::Delay(_))
    }
}

/// Result returned by every watcher callback.
///
/// An `Err` is routed to the driver's error handler, or out of
/// [`Driver::run`] when no handler is installed.
pub type CallbackResult = Result<(), Error>;

pub(crate) type OnceCallback = Box<dyn FnOnce(&Driver, WatcherId) -> CallbackResult>;
pub(crate) type RepeatCallback = Box<dyn FnMut(&Driver, WatcherId) -> CallbackResult>;

pub(crate) enum Callback {
    Once(OnceCallback),
    Repeat(RepeatCallback),
}

pub(crate) struct Watcher {
    pub(crate) kind: WatcherKind,
    /// `None` while the callback is executing.
    pub(crate) callback: Option<Callback>,
    pub(crate) enabled: bool,
    pub(crate) referenced: bool,
    /// Set once the watcher takes part in dispatch; cleared on disable.
    pub(crate) active: bool,
    pub(crate) expiration: Option<Instant>,
}

impl Watcher {
    pub(crate) fn new(kind: WatcherKind, callback: Callback) -> Self {
        Self {
            kind,
            callback: Some(callback),
            enabled: true,
            referenced: true,
            active: false,
            expiration: None,
        }
    }
}

/// Enabled/disabled counts for one watcher family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherCount {
    pub enabled: usize,
    pub disabled: usize,
}

/// Snapshot of the driver's registries returned by [`Driver::info`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverInfo {
    pub defer: WatcherCount,
    pub delay: WatcherCount,
    pub repeat: WatcherCount,
    pub on_readable: WatcherCount,
    pub on_writable: WatcherCount,
    pub on_signal: WatcherCount,
    /// Enabled watchers that keep [`Driver::run`] alive.
    pub referenced: usize,
    /// Enabled watchers that do not keep [`Driver::run`] alive.
    pub unreferenced: usize,
    /// Fibers that have not finished yet.
    pub fibers: usize,
    pub running: bool,
}

impl DriverInfo {
    pub(crate) fn count(&mut self, watcher: &Watcher) {
        let family = match watcher.kind {
            WatcherKind::Defer => &mut self.defer,
            WatcherKind::Delay(_) => &mut self.delay,
            WatcherKind::Repeat(_) => &mut self.repeat,
            WatcherKind::Readable(_) => &mut self.on_readable,
            WatcherKind::Writable(_) => &mut self.on_writable,
            WatcherKind::Signal(_) => &mut self.on_signal,
        };

        if watcher.enabled {
            family.enabled += 1;

            if watcher.referenced {
                self.referenced += 1;
            } else {
                self.unreferenced += 1;
            }
        } else {
            family.disabled += 1;
        }
    }
}
