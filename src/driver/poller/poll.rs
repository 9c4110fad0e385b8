use super::{Event, Interest, Poller};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, pollfd};
use std::io;
use std::time::Duration;

/// `poll(2)` based poller.
///
/// The descriptor set is rebuilt on every call, which keeps the poller
/// stateless at the cost of O(n) work per wait.
#[derive(Default)]
pub struct PollPoller {
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub fn new() -> Self {
        Self::default()
    }
}

// Rounds up so a timer due in 0.3ms does not turn into a busy loop of
// zero-timeout polls.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(timeout) => {
            let ms = timeout.as_millis().min(i32::MAX as u128) as u64;
            if ms < i32::MAX as u64 && Duration::from_millis(ms) < timeout {
                ms as i32 + 1
            } else {
                ms as i32
            }
        }
    }
}

impl Poller for PollPoller {
    fn poll(
        &mut self,
        interests: &[Interest],
        timeout: Option<Duration>,
        events: &mut Vec<Event>,
    ) -> io::Result<()> {
        self.fds.clear();
        self.fds.extend(interests.iter().map(|interest| {
            let mut flags = 0;
            if interest.read {
                flags |= POLLIN;
            }
            if interest.write {
                flags |= POLLOUT;
            }

            pollfd {
                fd: interest.fd,
                events: flags,
                revents: 0,
            }
        }));

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for fd in self.fds.iter().filter(|fd| fd.revents != 0) {
            let failed = fd.revents & (POLLERR | POLLHUP | POLLNVAL) != 0;

            events.push(Event {
                fd: fd.fd,
                readable: failed || fd.revents & POLLIN != 0,
                writable: failed || fd.revents & POLLOUT != 0,
            });
        }

        Ok(())
    }
}
