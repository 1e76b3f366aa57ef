//! A non-blocking, edge-triggered connected socket (component I/J).
//!
//! Every blocking-looking call here — `read`, `write`, `connect` —
//! parks the calling fiber on `EAGAIN` via its `Sink` and resumes when
//! the worker's dispatcher reports the fd ready again. Byte and
//! accept/close counts feed the shared `ConnectionMetrics` so a graceful
//! shutdown can wait for connections to drain without a mocked kernel.

use crate::listener::{set_nonblocking, set_tcp_nodelay};
use crate::sink::{Sink, WaitOutcome};
use crate::worker;
use fiber_error::{ErrorSite, NetError, NetResult};
use fiber_runtime::scheduler;
use std::cell::{Cell, RefCell};
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub struct Stream {
    fd: OwnedFd,
    sink: Rc<RefCell<Sink>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    closed: Cell<bool>,
    reader_shutdown: Cell<bool>,
    writer_shutdown: Cell<bool>,
}

// See the matching comment on `Listener`: a `Stream` never actually
// migrates between workers (the fd-handoff path in `server.rs` moves
// the raw fd, then builds a fresh `Stream` on the receiving worker),
// but it needs to satisfy the `Send` bound on fiber entry points.
unsafe impl Send for Stream {}

impl Stream {
    pub(crate) fn from_fd(fd: OwnedFd) -> NetResult<Self> {
        let raw = fd.as_raw_fd();
        let w = unsafe { &mut *worker::current() };
        let sink = w.register_fd(raw, &fd);
        w.metrics.on_accept();
        Ok(Self {
            fd,
            sink,
            read_timeout: None,
            write_timeout: None,
            closed: Cell::new(false),
            reader_shutdown: Cell::new(false),
            writer_shutdown: Cell::new(false),
        })
    }

    pub fn connect_inet(addr: Ipv4Addr, port: u16) -> NetResult<Self> {
        let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if raw < 0 {
            return Err(NetError::last_os_error(ErrorSite::Socket));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        set_nonblocking(fd.as_fd())?;
        set_tcp_nodelay(fd.as_fd());

        let sockaddr = SocketAddrV4::new(addr, port);
        let mut raw_addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        raw_addr.sin_family = libc::AF_INET as libc::sa_family_t;
        raw_addr.sin_port = sockaddr.port().to_be();
        raw_addr.sin_addr.s_addr = u32::from_ne_bytes(sockaddr.ip().octets());

        let ret = unsafe {
            libc::connect(
                raw,
                &raw_addr as *const _ as *const libc::sockaddr,
                mem::size_of_val(&raw_addr) as u32,
            )
        };

        let stream = Self::from_fd(fd)?;
        if ret == 0 {
            return Ok(stream);
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno != libc::EINPROGRESS {
            return Err(NetError::from_errno(ErrorSite::Socket, errno));
        }
        if stream.sink.borrow_mut().wait_writable() == WaitOutcome::Error {
            return Err(NetError::fatal(ErrorSite::Socket, None));
        }
        let mut sockerr: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as u32;
        let ret = unsafe {
            libc::getsockopt(
                raw,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut sockerr as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret != 0 || sockerr != 0 {
            return Err(NetError::from_errno(ErrorSite::Socket, sockerr));
        }
        Ok(stream)
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Read into `buf`. Returns `Ok(0)` on a clean EOF.
    pub fn read(&self, buf: &mut [u8]) -> NetResult<usize> {
        if self.closed.get() || self.reader_shutdown.get() {
            return Err(NetError::new(ErrorSite::Socket, fiber_error::NetErrorKind::Closed, Some(libc::EBADF)));
        }
        loop {
            let raw = self.fd.as_raw_fd();
            let n = unsafe { libc::read(raw, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                let w = unsafe { &mut *worker::current() };
                w.metrics.on_read(n as u64);
                return Ok(n as usize);
            }
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::EINTR => continue,
                libc::EAGAIN => {
                    if !self.wait_readable_with_timeout()? {
                        return Err(NetError::new(ErrorSite::Socket, fiber_error::NetErrorKind::TimedOut, None));
                    }
                    continue;
                }
                _ => return Err(NetError::from_errno(ErrorSite::Socket, errno)),
            }
        }
    }

    /// Write the entire buffer, parking on backpressure as needed.
    pub fn write_all(&self, mut buf: &[u8]) -> NetResult<usize> {
        if self.closed.get() || self.writer_shutdown.get() {
            return Err(NetError::new(ErrorSite::Socket, fiber_error::NetErrorKind::Closed, Some(libc::EBADF)));
        }
        let total = buf.len();
        while !buf.is_empty() {
            let raw = self.fd.as_raw_fd();
            let n = unsafe { libc::write(raw, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                let w = unsafe { &mut *worker::current() };
                w.metrics.on_write(n as u64);
                buf = &buf[n as usize..];
                continue;
            }
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::EINTR => continue,
                libc::EAGAIN => {
                    if !self.wait_writable_with_timeout()? {
                        return Err(NetError::new(ErrorSite::Socket, fiber_error::NetErrorKind::TimedOut, None));
                    }
                    continue;
                }
                _ => return Err(NetError::from_errno(ErrorSite::Socket, errno)),
            }
        }
        Ok(total)
    }

    /// Half-close the read side. Subsequent `read` calls return
    /// `EBADF`; `write_all` keeps working until the peer resets or
    /// `shutdown_writer`/`close` is also called.
    pub fn shutdown_reader(&self) {
        if self.reader_shutdown.replace(true) {
            return;
        }
        unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RD) };
        if let Some(id) = self.sink.borrow_mut().take_reader() {
            scheduler::wake(id);
        }
    }

    /// Half-close the write side; mirrors [`Self::shutdown_reader`].
    pub fn shutdown_writer(&self) {
        if self.writer_shutdown.replace(true) {
            return;
        }
        unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_WR) };
        if let Some(id) = self.sink.borrow_mut().take_writer() {
            scheduler::wake(id);
        }
    }

    /// Idempotent close: removes the sink from the dispatcher and closes
    /// the fd. A second call is a documented no-op, matching the
    /// close-idempotency testable property.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let raw = self.fd.as_raw_fd();
        let w = unsafe { &mut *worker::current() };
        w.deregister_fd(raw, &self.fd);
        w.metrics.on_close();
        self.sink.borrow_mut().mark_error();
    }

    /// Like [`Self::close`], but first sets `SO_LINGER{on,0}` so the
    /// kernel sends an RST instead of a clean FIN/ACK teardown.
    pub fn reset(&self) {
        if self.closed.get() {
            return;
        }
        let linger = libc::linger { l_onoff: 1, l_linger: 0 };
        unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                &linger as *const _ as *const libc::c_void,
                mem::size_of_val(&linger) as u32,
            );
        }
        self.close();
    }

    fn wait_readable_with_timeout(&self) -> NetResult<bool> {
        wait_with_deadline(self.read_timeout, || self.sink.borrow_mut().wait_readable())
    }

    fn wait_writable_with_timeout(&self) -> NetResult<bool> {
        wait_with_deadline(self.write_timeout, || self.sink.borrow_mut().wait_writable())
    }
}

/// Race a sink wait against an optional deadline. `wait` parks the
/// fiber and returns why it woke; a timer armed alongside it can wake
/// the same fiber first, which `wait` reports as `TimedOut`. Returns
/// `Ok(true)` once the direction is genuinely ready, `Ok(false)` once
/// the deadline has passed with no readiness event.
fn wait_with_deadline(
    timeout: Option<Duration>,
    mut wait: impl FnMut() -> WaitOutcome,
) -> NetResult<bool> {
    let Some(timeout) = timeout else {
        return match wait() {
            WaitOutcome::Ready => Ok(true),
            WaitOutcome::TimedOut => Ok(true), // no deadline armed, so this can't happen
            WaitOutcome::Error => Err(NetError::fatal(ErrorSite::Socket, None)),
        };
    };

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let handle = scheduler::schedule_wake(remaining);
        let outcome = wait();
        if let Some(handle) = handle {
            scheduler::cancel_timer(handle);
        }
        match outcome {
            WaitOutcome::Ready => return Ok(true),
            WaitOutcome::Error => return Err(NetError::fatal(ErrorSite::Socket, None)),
            WaitOutcome::TimedOut => {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                // Spurious wake before the deadline; loop and wait again.
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}
