//! The event loop.
//!
//! A [`Driver`] owns every watcher registered on it and runs them from a
//! single thread in ticks. Each tick:
//!
//! 1. activates the watchers created or enabled since the previous tick,
//! 2. runs the deferred callbacks and woken fibers queued at tick start,
//! 3. runs every timer whose expiration has passed,
//! 4. waits for readiness until the next timer (or not at all when work is
//!    already queued),
//! 5. runs the readable, writable and signal watchers that became ready,
//! 6. delivers errors escalated by futures that nobody observed.
//!
//! A watcher created or enabled while a tick is running is only activated at
//! the start of the next one, so callbacks can never starve the loop by
//! scheduling themselves.
//!
//! Callbacks return [`CallbackResult`]. An `Err` is handed to the error
//! handler; without one, [`Driver::run`] stops and returns it.

pub mod poller;
mod signal;
mod timer_queue;
mod watcher;

pub use watcher::{CallbackResult, DriverInfo, WatcherCount, WatcherId, WatcherKind};

use crate::error::Error;
use crate::runtime::Task;
use crate::runtime::queue::{ReadyQueue, Runnable};
use crate::utils::Slab;

use log::{debug, trace, warn};
use poller::{Event, Interest, Poller};
use signal::{SignalGuard, SignalInbox};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer_queue::TimerQueue;
use watcher::{Callback, RepeatCallback, Watcher};

/// Handler receiving the errors returned by watcher callbacks.
///
/// Returning `Err` from the handler stops [`Driver::run`] with that error.
pub type ErrorHandler = Box<dyn FnMut(&Driver, Error) -> CallbackResult>;

/// Far enough in the future to never fire, used when `now + delay` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub(crate) struct Inner {
    watchers: RefCell<BTreeMap<WatcherId, Watcher>>,
    next_id: Cell<u64>,
    /// Watchers created or enabled since the start of the current tick.
    activation: RefCell<Vec<WatcherId>>,
    timers: RefCell<TimerQueue>,
    poller: RefCell<Box<dyn Poller>>,
    events: RefCell<Vec<Event>>,
    signals: RefCell<HashMap<i32, SignalGuard>>,
    /// Signals relayed to this driver and not dispatched yet.
    signal_inbox: Arc<SignalInbox>,
    error_handler: RefCell<Option<ErrorHandler>>,
    handler_generation: Cell<u64>,
    unhandled: RefCell<VecDeque<Error>>,
    state: RefCell<HashMap<String, Rc<dyn Any>>>,
    pub(crate) ready: Arc<ReadyQueue>,
    pub(crate) tasks: RefCell<Slab<Option<Task>>>,
    running: Cell<bool>,
    stopped: Cell<bool>,
    now: Cell<Instant>,
}

/// Handle to an event loop.
///
/// Cloning is cheap and every clone drives the same loop. The driver is bound
/// to the thread that created it.
///
/// # Example
/// ```ignore
/// let driver = Driver::new();
///
/// driver.delay(Duration::from_millis(10), |_, _| {
///     println!("later");
///     Ok(())
/// });
/// driver.defer(|_, _| {
///     println!("first");
///     Ok(())
/// });
///
/// driver.run()?;
/// ```
#[derive(Clone)]
pub struct Driver {
    pub(crate) inner: Rc<Inner>,
}

/// Non-owning handle held by the primitives that a driver's own callbacks
/// keep alive, so that they never form a reference cycle with it.
#[derive(Clone)]
pub(crate) struct WeakDriver(Weak<Inner>);

impl WeakDriver {
    pub(crate) fn upgrade(&self) -> Option<Driver> {
        self.0.upgrade().map(|inner| Driver { inner })
    }
}

/// Resets the running flag even when a callback unwinds out of `run`.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

fn deadline(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay).unwrap_or(from + FAR_FUTURE)
}

impl Driver {
    /// Creates a driver with the default `poll(2)` backend and no error
    /// handler.
    ///
    /// See [`DriverBuilder`](crate::DriverBuilder) for the other options.
    pub fn new() -> Self {
        crate::DriverBuilder::new().build()
    }

    pub(crate) fn from_parts(
        poller: Box<dyn Poller>,
        error_handler: Option<ErrorHandler>,
        state: HashMap<String, Rc<dyn Any>>,
    ) -> Self {
        let inner = Inner {
            watchers: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
            activation: RefCell::new(Vec::new()),
            timers: RefCell::new(TimerQueue::new()),
            poller: RefCell::new(poller),
            events: RefCell::new(Vec::new()),
            signals: RefCell::new(HashMap::new()),
            signal_inbox: Arc::new(SignalInbox::default()),
            error_handler: RefCell::new(error_handler),
            handler_generation: Cell::new(0),
            unhandled: RefCell::new(VecDeque::new()),
            state: RefCell::new(state),
            ready: Arc::new(ReadyQueue::new()),
            tasks: RefCell::new(Slab::new()),
            running: Cell::new(false),
            stopped: Cell::new(false),
            now: Cell::new(Instant::now()),
        };

        Self {
            inner: Rc::new(inner),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakDriver {
        WeakDriver(Rc::downgrade(&self.inner))
    }

    /// Schedules `callback` to run once in the next tick.
    ///
    /// Deferred callbacks run in registration order, before any timer of the
    /// same tick.
    pub fn defer<F>(&self, callback: F) -> WatcherId
    where
        F: FnOnce(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.register(WatcherKind::Defer, Callback::Once(Box::new(callback)))
    }

    /// Schedules `callback` to run once after `delay`.
    ///
    /// # Example
    /// ```ignore
    /// driver.delay(Duration::from_millis(100), |driver, _| {
    ///     driver.stop();
    ///     Ok(())
    /// });
    /// ```
    pub fn delay<F>(&self, delay: Duration, callback: F) -> WatcherId
    where
        F: FnOnce(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.register(WatcherKind::Delay(delay), Callback::Once(Box::new(callback)))
    }

    /// Schedules `callback` to run every `interval` until the watcher is
    /// cancelled.
    ///
    /// The next expiration is computed right before each invocation, so a
    /// slow callback delays the following one instead of causing a burst.
    pub fn repeat<F>(&self, interval: Duration, callback: F) -> WatcherId
    where
        F: FnMut(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.register(
            WatcherKind::Repeat(interval),
            Callback::Repeat(Box::new(callback)),
        )
    }

    /// Runs `callback` every tick in which `fd` is readable.
    ///
    /// Readiness is level-triggered: the callback keeps firing until the data
    /// is consumed or the watcher is disabled.
    pub fn on_readable<F>(&self, fd: RawFd, callback: F) -> WatcherId
    where
        F: FnMut(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.register(
            WatcherKind::Readable(fd),
            Callback::Repeat(Box::new(callback)),
        )
    }

    /// Runs `callback` every tick in which `fd` is writable.
    pub fn on_writable<F>(&self, fd: RawFd, callback: F) -> WatcherId
    where
        F: FnMut(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.register(
            WatcherKind::Writable(fd),
            Callback::Repeat(Box::new(callback)),
        )
    }

    /// Runs `callback` every time the process receives `signum`.
    ///
    /// The process-wide handler for `signum` is installed by the first driver
    /// watching it and restored once no driver in the process watches it
    /// anymore. Every driver watching `signum` receives each delivery.
    ///
    /// # Errors
    /// Fails when the signal handler cannot be installed, for example for
    /// `SIGKILL`.
    pub fn on_signal<F>(&self, signum: i32, callback: F) -> Result<WatcherId, Error>
    where
        F: FnMut(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        if !self.inner.signals.borrow().contains_key(&signum) {
            let guard = SignalGuard::install(signum, &self.inner.signal_inbox)?;
            self.inner.signals.borrow_mut().insert(signum, guard);
        }

        Ok(self.register(
            WatcherKind::Signal(signum),
            Callback::Repeat(Box::new(callback)),
        ))
    }

    fn register(&self, kind: WatcherKind, callback: Callback) -> WatcherId {
        let id = WatcherId::from_raw(self.inner.next_id.get());
        self.inner.next_id.set(id.into_raw() + 1);

        let mut watcher = Watcher::new(kind, callback);
        if let WatcherKind::Delay(delay) | WatcherKind::Repeat(delay) = kind {
            watcher.expiration = Some(deadline(Instant::now(), delay));
        }

        self.inner.watchers.borrow_mut().insert(id, watcher);
        self.inner.activation.borrow_mut().push(id);

        trace!("registered {kind:?} watcher {id}");

        id
    }

    fn was_issued(&self, id: WatcherId) -> bool {
        id.into_raw() < self.inner.next_id.get()
    }

    /// Enables a disabled watcher. It takes part in dispatch from the next
    /// tick on; timers restart their delay from now.
    ///
    /// # Errors
    /// [`Error::InvalidWatcher`] if `id` does not name a live watcher.
    pub fn enable(&self, id: WatcherId) -> Result<(), Error> {
        let mut watchers = self.inner.watchers.borrow_mut();
        let watcher = watchers.get_mut(&id).ok_or(Error::InvalidWatcher(id))?;

        if watcher.enabled {
            return Ok(());
        }

        watcher.enabled = true;
        if let WatcherKind::Delay(delay) | WatcherKind::Repeat(delay) = watcher.kind {
            watcher.expiration = Some(deadline(Instant::now(), delay));
        }

        self.inner.activation.borrow_mut().push(id);

        Ok(())
    }

    /// Disables a watcher without cancelling it. Unknown identifiers are
    /// ignored.
    pub fn disable(&self, id: WatcherId) {
        let mut watchers = self.inner.watchers.borrow_mut();
        let Some(watcher) = watchers.get_mut(&id) else {
            return;
        };

        if !watcher.enabled {
            return;
        }

        watcher.enabled = false;
        if watcher.active && watcher.kind.is_timer() {
            self.inner.timers.borrow_mut().remove(id);
        }
        watcher.active = false;
    }

    /// Cancels a watcher for good. Unknown identifiers are ignored.
    pub fn cancel(&self, id: WatcherId) {
        let removed = self.inner.watchers.borrow_mut().remove(&id);
        let Some(watcher) = removed else {
            return;
        };

        if watcher.kind.is_timer() {
            self.inner.timers.borrow_mut().remove(id);
        }

        let released = match watcher.kind {
            WatcherKind::Signal(signum) => {
                let in_use = self
                    .inner
                    .watchers
                    .borrow()
                    .values()
                    .any(|w| w.kind == WatcherKind::Signal(signum));

                if in_use {
                    None
                } else {
                    self.inner.signals.borrow_mut().remove(&signum)
                }
            }
            _ => None,
        };

        trace!("cancelled watcher {id}");

        drop(released);
        drop(watcher);
    }

    /// Makes the watcher keep [`run`](Self::run) alive again (the default).
    ///
    /// # Errors
    /// [`Error::InvalidWatcher`] if `id` does not name a live watcher.
    pub fn reference(&self, id: WatcherId) -> Result<(), Error> {
        let mut watchers = self.inner.watchers.borrow_mut();
        let watcher = watchers.get_mut(&id).ok_or(Error::InvalidWatcher(id))?;
        watcher.referenced = true;

        Ok(())
    }

    /// Lets [`run`](Self::run) return while this watcher is still enabled.
    ///
    /// Already cancelled watchers are ignored.
    ///
    /// # Errors
    /// [`Error::InvalidWatcher`] if `id` was never issued by this driver.
    pub fn unreference(&self, id: WatcherId) -> Result<(), Error> {
        if !self.was_issued(id) {
            return Err(Error::InvalidWatcher(id));
        }

        if let Some(watcher) = self.inner.watchers.borrow_mut().get_mut(&id) {
            watcher.referenced = false;
        }

        Ok(())
    }

    /// Runs the loop until [`stop`](Self::stop) is called or nothing keeps it
    /// alive: no queued work and no enabled, referenced watcher.
    ///
    /// # Errors
    /// Returns the first callback error that no error handler absorbed. The
    /// loop state stays consistent, so `run` can be called again.
    ///
    /// # Panics
    /// Panics if the driver is already running.
    pub fn run(&self) -> Result<(), Error> {
        if self.inner.running.replace(true) {
            panic!("the driver is already running");
        }
        let _running = RunningGuard(&self.inner.running);
        self.inner.stopped.set(false);

        debug!("driver started");

        let mut ticks = 0u64;
        let result = loop {
            if self.inner.stopped.get() || !self.is_alive() {
                break Ok(());
            }

            ticks += 1;
            if let Err(err) = self.tick() {
                break Err(err);
            }
        };

        debug!("driver stopped after {ticks} ticks");

        result
    }

    /// Defers `bootstrap` and runs the loop.
    pub fn run_with<F>(&self, bootstrap: F) -> Result<(), Error>
    where
        F: FnOnce(&Driver, WatcherId) -> CallbackResult + 'static,
    {
        self.defer(bootstrap);
        self.run()
    }

    /// Asks the loop to return at the end of the current tick.
    ///
    /// Does nothing when the loop is not running.
    pub fn stop(&self) {
        if self.inner.running.get() && !self.inner.stopped.replace(true) {
            debug!("driver stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Time at which the current tick started.
    pub fn now(&self) -> Instant {
        self.inner.now.get()
    }

    fn is_alive(&self) -> bool {
        !self.inner.ready.is_empty()
            || !self.inner.unhandled.borrow().is_empty()
            || self
                .inner
                .watchers
                .borrow()
                .values()
                .any(|w| w.enabled && w.referenced)
    }

    fn tick(&self) -> Result<(), Error> {
        self.inner.now.set(Instant::now());

        self.activate();
        self.dispatch_ready()?;
        self.dispatch_timers()?;
        self.dispatch_io()?;
        self.deliver_unhandled()
    }

    fn activate(&self) {
        let pending = std::mem::take(&mut *self.inner.activation.borrow_mut());
        let mut watchers = self.inner.watchers.borrow_mut();

        for id in pending {
            let Some(watcher) = watchers.get_mut(&id) else {
                continue;
            };

            if !watcher.enabled || watcher.active {
                continue;
            }
            watcher.active = true;

            match watcher.kind {
                WatcherKind::Defer => self.inner.ready.push(Runnable::Watcher(id)),
                WatcherKind::Delay(_) | WatcherKind::Repeat(_) => {
                    let expiration = watcher.expiration.unwrap_or(self.inner.now.get());
                    self.inner.timers.borrow_mut().insert(id, expiration);
                }
                _ => {}
            }
        }
    }

    fn dispatch_ready(&self) -> Result<(), Error> {
        let mut batch = self.inner.ready.take_batch();
        if !batch.is_empty() {
            trace!("dispatching {} ready entries", batch.len());
        }

        while let Some(runnable) = batch.pop_front() {
            let result = match runnable {
                Runnable::Watcher(id) => self.invoke(id),
                Runnable::Task(task) => {
                    self.poll_task(task);
                    Ok(())
                }
            };

            if let Err(err) = result {
                self.inner.ready.requeue(batch.into_iter());
                return Err(err);
            }
        }

        Ok(())
    }

    fn dispatch_timers(&self) -> Result<(), Error> {
        let now = self.inner.now.get();
        let mut expired = Vec::new();
        {
            let mut timers = self.inner.timers.borrow_mut();
            if timers.is_empty() {
                return Ok(());
            }

            while let Some(entry) = timers.extract(now) {
                expired.push(entry.watcher);
            }

            if !expired.is_empty() {
                trace!(
                    "dispatching {} expired timers, {} pending",
                    expired.len(),
                    timers.len()
                );
            }
        }

        let mut expired = expired.into_iter();
        while let Some(id) = expired.next() {
            self.rearm(id);

            if let Err(err) = self.invoke(id) {
                self.restore_timers(expired);
                return Err(err);
            }
        }

        Ok(())
    }

    /// Re-inserts a repeat timer before its callback runs.
    fn rearm(&self, id: WatcherId) {
        let mut watchers = self.inner.watchers.borrow_mut();
        let Some(watcher) = watchers.get_mut(&id) else {
            return;
        };

        if let WatcherKind::Repeat(interval) = watcher.kind {
            if watcher.enabled && watcher.active {
                let expiration = deadline(Instant::now(), interval);
                watcher.expiration = Some(expiration);
                self.inner.timers.borrow_mut().insert(id, expiration);
            }
        }
    }

    fn restore_timers(&self, rest: impl Iterator<Item = WatcherId>) {
        let watchers = self.inner.watchers.borrow();
        let mut timers = self.inner.timers.borrow_mut();

        for id in rest {
            if let Some(watcher) = watchers.get(&id) {
                if watcher.enabled && watcher.active {
                    timers.insert(id, watcher.expiration.unwrap_or(self.inner.now.get()));
                }
            }
        }
    }

    fn interests(&self) -> Vec<Interest> {
        fn merge(interests: &mut Vec<Interest>, fd: RawFd, read: bool, write: bool) {
            match interests.iter_mut().find(|i| i.fd == fd) {
                Some(interest) => {
                    interest.read |= read;
                    interest.write |= write;
                }
                None => interests.push(Interest { fd, read, write }),
            }
        }

        let mut interests = Vec::new();
        let mut signals = false;

        for watcher in self.inner.watchers.borrow().values() {
            if !watcher.enabled || !watcher.active {
                continue;
            }

            match watcher.kind {
                WatcherKind::Readable(fd) => merge(&mut interests, fd, true, false),
                WatcherKind::Writable(fd) => merge(&mut interests, fd, false, true),
                WatcherKind::Signal(_) => signals = true,
                _ => {}
            }
        }

        if signals {
            match signal::read_fd() {
                Ok(fd) => merge(&mut interests, fd, true, false),
                Err(err) => warn!("signal relay unavailable: {err}"),
            }
        }

        interests
    }

    fn poll_timeout(&self, interests: &[Interest]) -> Option<Duration> {
        let busy = self.inner.stopped.get()
            || !self.inner.ready.is_empty()
            || !self.inner.activation.borrow().is_empty()
            || !self.inner.unhandled.borrow().is_empty()
            || self.inner.signal_inbox.has_pending();

        if busy {
            return Some(Duration::ZERO);
        }

        match self.inner.timers.borrow().peek() {
            Some(expiration) => Some(expiration.saturating_duration_since(Instant::now())),
            None if interests.is_empty() => Some(Duration::ZERO),
            None => None,
        }
    }

    fn dispatch_io(&self) -> Result<(), Error> {
        let interests = self.interests();
        let timeout = self.poll_timeout(&interests);

        let mut events = std::mem::take(&mut *self.inner.events.borrow_mut());
        events.clear();

        self.inner
            .poller
            .borrow_mut()
            .poll(&interests, timeout, &mut events)?;

        let watching = !self.inner.signals.borrow().is_empty();
        let relay = if watching { signal::read_fd().ok() } else { None };

        if events
            .iter()
            .any(|event| Some(event.fd) == relay && event.readable)
        {
            signal::drain();
        }

        let signals = if watching {
            self.inner.signal_inbox.take()
        } else {
            Vec::new()
        };

        let mut ready = Vec::new();
        {
            let watchers = self.inner.watchers.borrow();

            for event in events.iter().filter(|event| Some(event.fd) != relay) {
                ready.extend(watchers.iter().filter_map(|(id, w)| {
                    let hit = match w.kind {
                        WatcherKind::Readable(fd) => fd == event.fd && event.readable,
                        WatcherKind::Writable(fd) => fd == event.fd && event.writable,
                        _ => false,
                    };
                    (hit && w.enabled && w.active).then_some(*id)
                }));
            }

            for signum in signals {
                ready.extend(watchers.iter().filter_map(|(id, w)| {
                    let hit = w.kind == WatcherKind::Signal(signum);
                    (hit && w.enabled && w.active).then_some(*id)
                }));
            }
        }

        *self.inner.events.borrow_mut() = events;

        for id in ready {
            self.invoke(id)?;
        }

        Ok(())
    }

    fn deliver_unhandled(&self) -> Result<(), Error> {
        loop {
            let next = self.inner.unhandled.borrow_mut().pop_front();
            let Some(err) = next else {
                return Ok(());
            };

            self.handle_error(err)?;
        }
    }

    /// Runs one watcher callback if the watcher is still enabled and active.
    fn invoke(&self, id: WatcherId) -> Result<(), Error> {
        let callback = {
            let mut watchers = self.inner.watchers.borrow_mut();
            let Some(watcher) = watchers.get_mut(&id) else {
                return Ok(());
            };

            if !watcher.enabled || !watcher.active {
                return Ok(());
            }

            if watcher.kind.is_one_shot() {
                watchers.remove(&id).and_then(|w| w.callback)
            } else {
                watcher.callback.take()
            }
        };

        let result = match callback {
            Some(Callback::Once(callback)) => callback(self, id),
            Some(Callback::Repeat(mut callback)) => {
                let result = callback(self, id);
                self.restore(id, callback);
                result
            }
            // Re-entered while its own callback is running.
            None => return Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => self.handle_error(err),
        }
    }

    fn restore(&self, id: WatcherId, callback: RepeatCallback) {
        let leftover = {
            let mut watchers = self.inner.watchers.borrow_mut();
            match watchers.get_mut(&id) {
                Some(watcher) if watcher.callback.is_none() => {
                    watcher.callback = Some(Callback::Repeat(callback));
                    None
                }
                _ => Some(callback),
            }
        };

        drop(leftover);
    }

    /// Installs (or with `None` removes) the error handler and returns the
    /// previous one.
    ///
    /// While the handler itself is running it is not installed, so calling
    /// this from inside it returns `None`.
    ///
    /// # Example
    /// ```ignore
    /// driver.set_error_handler(Some(Box::new(|_, err| {
    ///     eprintln!("callback failed: {err}");
    ///     Ok(())
    /// })));
    /// ```
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) -> Option<ErrorHandler> {
        self.inner
            .handler_generation
            .set(self.inner.handler_generation.get() + 1);

        std::mem::replace(&mut *self.inner.error_handler.borrow_mut(), handler)
    }

    pub(crate) fn handle_error(&self, error: Error) -> Result<(), Error> {
        let handler = self.inner.error_handler.borrow_mut().take();
        let Some(mut handler) = handler else {
            return Err(error);
        };

        let generation = self.inner.handler_generation.get();
        let result = handler(self, error);

        let leftover = {
            let mut slot = self.inner.error_handler.borrow_mut();
            if slot.is_none() && self.inner.handler_generation.get() == generation {
                *slot = Some(handler);
                None
            } else {
                Some(handler)
            }
        };

        drop(leftover);
        result
    }

    /// Queues the failure of a future that was dropped without anyone
    /// observing it. It reaches the error handler at the end of the tick.
    pub(crate) fn report_unhandled(&self, error: Error) {
        warn!("future failed without being observed: {error}");

        self.inner
            .unhandled
            .borrow_mut()
            .push_back(Error::Unhandled(Box::new(error)));
    }

    /// Counts the registered watchers by family and state.
    pub fn info(&self) -> DriverInfo {
        let mut info = DriverInfo {
            fibers: self.inner.tasks.borrow().len(),
            running: self.is_running(),
            ..DriverInfo::default()
        };

        for watcher in self.inner.watchers.borrow().values() {
            info.count(watcher);
        }

        info
    }

    /// Returns the value stored under `key`.
    pub fn get_state(&self, key: &str) -> Option<Rc<dyn Any>> {
        self.inner.state.borrow().get(key).cloned()
    }

    /// Stores `value` under `key`; `None` removes the entry.
    pub fn set_state(&self, key: &str, value: Option<Rc<dyn Any>>) {
        let previous = match value {
            Some(value) => self.inner.state.borrow_mut().insert(key.to_owned(), value),
            None => self.inner.state.borrow_mut().remove(key),
        };

        drop(previous);
    }

    /// Returns the value stored under `key` if it has type `T`.
    ///
    /// # Example
    /// ```ignore
    /// driver.set_state("hits", Some(Rc::new(Cell::new(0u32))));
    /// let hits = driver.state::<Cell<u32>>("hits").unwrap();
    /// ```
    pub fn state<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        self.get_state(key)?.downcast::<T>().ok()
    }
}
