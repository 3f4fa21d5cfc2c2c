//! Level-triggered readiness notification over many descriptors (epoll).
//!
//! The poller never owns the descriptors registered with it; callers must
//! [`Poller::delete`] a descriptor before closing it.

use std::io::ErrorKind;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};

const EVENT_BATCH: usize = 16;

/// Caller-chosen identifier attached to a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token the descriptor was registered with.
    pub token: Token,
    /// Data (or EOF) is available to read.
    pub readable: bool,
    /// The peer hung up or the descriptor is in an error state.
    pub hangup: bool,
}

/// Readiness multiplexer backed by epoll.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    /// Create a new poller.
    pub fn new() -> Result<Self> {
        // SAFETY: epoll_create1 has no pointer arguments.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(TransportError::PollCreate(std::io::Error::last_os_error()));
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll })
    }

    /// Start watching `fd` for readability, reporting it as `token`.
    pub fn add(&self, fd: RawFd, token: Token) -> Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token.0,
        };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        let rc = unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc != 0 {
            return Err(TransportError::PollRegister {
                fd,
                source: std::io::Error::last_os_error(),
            });
        }
        trace!(fd, token = token.0, "added fd to poller");
        Ok(())
    }

    /// Stop watching `fd`.
    pub fn delete(&self, fd: RawFd) -> Result<()> {
        // SAFETY: a null event pointer is permitted for EPOLL_CTL_DEL.
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            return Err(TransportError::PollRegister {
                fd,
                source: std::io::Error::last_os_error(),
            });
        }
        trace!(fd, "removed fd from poller");
        Ok(())
    }

    /// Block until at least one registered descriptor is ready, or `timeout`
    /// elapses. Ready events replace the contents of `events`.
    ///
    /// Interrupted waits are retried. Any other failure means the poller can
    /// no longer deliver readiness and is returned as
    /// [`TransportError::PollWait`].
    pub fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = match timeout {
            Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };
        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];

        let count = loop {
            // SAFETY: `raw` is a writable buffer of EVENT_BATCH epoll_event entries.
            let rc = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    raw.as_mut_ptr(),
                    EVENT_BATCH as i32,
                    timeout_ms,
                )
            };
            if rc >= 0 {
                break rc as usize;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::PollWait(err));
        };

        events.clear();
        for entry in &raw[..count] {
            let flags = entry.events;
            let token = entry.u64;
            events.push(Event {
                token: Token(token),
                readable: flags & libc::EPOLLIN as u32 != 0,
                hangup: flags & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0,
            });
        }
        Ok(())
    }
}
