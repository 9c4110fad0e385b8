//! Process-wide signal relay.
//!
//! Signal handlers may only touch async-signal-safe state, so the installed
//! handler does nothing but write the signal number into a non-blocking pipe.
//! The driver adds the read end of that pipe to its poll set while signal
//! watchers are active and turns every byte read into watcher dispatches.
//!
//! The pipe and the installed handlers are shared by the whole process. A
//! handler stays installed while any driver watches its signal, and a
//! signal read from the pipe by one driver is handed to every driver that
//! watches it.

use libc::{c_int, c_void};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

static PIPE: OnceLock<Result<(RawFd, RawFd), i32>> = OnceLock::new();
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn relay(signum: c_int) {
    let fd = WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }

    let saved = errno();
    let byte = signum as u8;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const c_void, 1);
    }
    set_errno(saved);
}

#[cfg(target_os = "linux")]
fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

fn errno() -> c_int {
    unsafe { *errno_location() }
}

fn set_errno(value: c_int) {
    unsafe { *errno_location() = value };
}

fn set_flags(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

fn open_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    for fd in fds {
        if let Err(err) = set_flags(fd) {
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }

    Ok((fds[0], fds[1]))
}

fn pipe() -> io::Result<(RawFd, RawFd)> {
    let pipe = PIPE.get_or_init(|| {
        open_pipe()
            .inspect(|&(_, write)| WRITE_FD.store(write, Ordering::Relaxed))
            .map_err(|err| err.raw_os_error().unwrap_or(libc::EIO))
    });

    match *pipe {
        Ok(fds) => Ok(fds),
        Err(code) => Err(io::Error::from_raw_os_error(code)),
    }
}

/// Read end of the relay pipe.
pub(crate) fn read_fd() -> io::Result<RawFd> {
    pipe().map(|(read, _)| read)
}

/// Signal numbers relayed to one driver and not dispatched yet.
///
/// Every driver owns one inbox. Draining the relay pipe fans each signal out
/// to the inbox of every driver watching it, whichever driver happened to
/// read the pipe.
#[derive(Debug, Default)]
pub(crate) struct SignalInbox {
    pending: Mutex<BTreeSet<i32>>,
}

impl SignalInbox {
    fn pending(&self) -> MutexGuard<'_, BTreeSet<i32>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes and returns the pending signal numbers, lowest first.
    pub(crate) fn take(&self) -> Vec<i32> {
        std::mem::take(&mut *self.pending()).into_iter().collect()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending().is_empty()
    }
}

/// Relay handler installed for one signal number.
struct Installed {
    /// Disposition to restore once the last guard goes away.
    previous: libc::sigaction,
    /// Inboxes of the drivers holding a guard for this signal.
    inboxes: Vec<Weak<SignalInbox>>,
}

/// Handlers installed by this process, keyed by signal number.
static HANDLERS: Mutex<BTreeMap<i32, Installed>> = Mutex::new(BTreeMap::new());

fn handlers() -> MutexGuard<'static, BTreeMap<i32, Installed>> {
    HANDLERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads every pending signal number from the relay pipe and hands each one
/// to the inbox of every driver watching it.
///
/// The registry stays locked while the pipe is read, so a signal is never
/// read by one thread and missing from the inboxes seen by another.
pub(crate) fn drain() {
    let Ok(fd) = read_fd() else {
        return;
    };

    let handlers = handlers();
    let mut buf = [0u8; 64];

    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if n <= 0 {
            break;
        }

        for signum in buf[..n as usize].iter().map(|&b| b as i32) {
            let Some(installed) = handlers.get(&signum) else {
                continue;
            };

            for inbox in installed.inboxes.iter().filter_map(Weak::upgrade) {
                inbox.pending().insert(signum);
            }
        }
    }
}

/// Registers one driver's interest in a signal.
///
/// The relay handler is installed when the first guard for a signal number
/// is created anywhere in the process and the previous disposition is
/// restored when the last one is dropped.
pub(crate) struct SignalGuard {
    signum: c_int,
    inbox: Weak<SignalInbox>,
}

impl SignalGuard {
    /// Subscribes `inbox` to `signum`.
    ///
    /// # Arguments
    /// * `signum` - The signal to relay
    /// * `inbox` - The inbox of the driver that watches it
    ///
    /// # Returns
    /// The guard keeping the subscription, or the error of `sigaction` when
    /// the handler cannot be installed
    pub(crate) fn install(signum: i32, inbox: &Arc<SignalInbox>) -> io::Result<Self> {
        pipe()?;

        let mut handlers = handlers();

        if !handlers.contains_key(&signum) {
            let previous = unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = relay as extern "C" fn(c_int) as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut action.sa_mask);

                let mut previous: libc::sigaction = mem::zeroed();
                if libc::sigaction(signum, &action, &mut previous) != 0 {
                    return Err(io::Error::last_os_error());
                }

                previous
            };

            log::debug!("installed relay handler for signal {signum}");

            handlers.insert(
                signum,
                Installed {
                    previous,
                    inboxes: Vec::new(),
                },
            );
        }

        let inbox = Arc::downgrade(inbox);
        if let Some(installed) = handlers.get_mut(&signum) {
            installed.inboxes.push(inbox.clone());
        }

        Ok(Self { signum, inbox })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut handlers = handlers();
        let Some(installed) = handlers.get_mut(&self.signum) else {
            return;
        };

        if let Some(index) = installed
            .inboxes
            .iter()
            .position(|inbox| inbox.ptr_eq(&self.inbox))
        {
            installed.inboxes.swap_remove(index);
        }

        if !installed.inboxes.is_empty() {
            return;
        }

        if let Some(installed) = handlers.remove(&self.signum) {
            unsafe {
                libc::sigaction(self.signum, &installed.previous, std::ptr::null_mut());
            }

            log::debug!("restored handler for signal {}", self.signum);
        }
    }
}
