//! Per-worker edge-triggered event dispatcher (component F).
//!
//! Exactly one epoll instance per worker, touched only by the thread
//! that owns it — same exclusive-ownership discipline as the scheduler
//! it sits beside. `poll` is the one place a worker blocks in the
//! kernel; everything else in the scheduling loop is non-blocking.

use fiber_error::{ErrorSite, NetError};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

/// Readiness direction a sink cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// One fd's readiness transition reported by a single `poll` call.
#[derive(Debug, Clone, Copy)]
pub struct DispatchEvent {
    pub fd: RawFd,
    pub readiness: Readiness,
}

pub struct Dispatcher {
    epoll: Epoll,
    buf: Vec<EpollEvent>,
}

impl Dispatcher {
    pub fn new(max_events: usize) -> Result<Self, NetError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| NetError::fatal(ErrorSite::Dispatcher, Some(e as i32)))?;
        Ok(Self {
            epoll,
            buf: vec![EpollEvent::empty(); max_events.max(1)],
        })
    }

    /// Register `fd` edge-triggered for the given direction(s). `fd` is
    /// used verbatim as the epoll data word, so a worker's dispatcher
    /// and its sink table stay trivially in sync by fd.
    pub fn register(&self, fd: BorrowedFd<'_>, readable: bool, writable: bool) -> Result<(), NetError> {
        let event = EpollEvent::new(interest_flags(readable, writable), fd.as_raw_fd() as u64);
        self.epoll
            .add(fd, event)
            .map_err(|e| NetError::from_errno(ErrorSite::Dispatcher, e as i32))
    }

    pub fn modify(&self, fd: BorrowedFd<'_>, readable: bool, writable: bool) -> Result<(), NetError> {
        let mut event = EpollEvent::new(interest_flags(readable, writable), fd.as_raw_fd() as u64);
        self.epoll
            .modify(fd, &mut event)
            .map_err(|e| NetError::from_errno(ErrorSite::Dispatcher, e as i32))
    }

    pub fn deregister(&self, fd: BorrowedFd<'_>) -> Result<(), NetError> {
        self.epoll
            .delete(fd)
            .map_err(|e| NetError::from_errno(ErrorSite::Dispatcher, e as i32))
    }

    /// Block until an event arrives or `timeout` elapses. `EINTR` is
    /// retried internally per the error handling design; any other
    /// dispatcher error is logged by the caller and the worker continues
    /// to its next iteration rather than panicking.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<DispatchEvent>, NetError> {
        let epoll_timeout: EpollTimeout = match timeout {
            Some(d) => {
                let ms = d.as_millis().min(u16::MAX as u128) as u16;
                EpollTimeout::try_from(ms).unwrap_or(EpollTimeout::NONE)
            }
            None => EpollTimeout::NONE,
        };

        loop {
            match self.epoll.wait(&mut self.buf, epoll_timeout) {
                Ok(n) => {
                    let mut out = Vec::with_capacity(n);
                    for ev in &self.buf[..n] {
                        let flags = ev.events();
                        out.push(DispatchEvent {
                            fd: ev.data() as RawFd,
                            readiness: Readiness {
                                readable: flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP),
                                writable: flags.intersects(EpollFlags::EPOLLOUT),
                                error: flags.intersects(EpollFlags::EPOLLERR),
                            },
                        });
                    }
                    return Ok(out);
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(NetError::from_errno(ErrorSite::Dispatcher, e as i32)),
            }
        }
    }
}

fn interest_flags(readable: bool, writable: bool) -> EpollFlags {
    let mut flags = EpollFlags::EPOLLET;
    if readable {
        flags |= EpollFlags::EPOLLIN;
    }
    if writable {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}
