//! TCP/Unix listeners (component I/J): non-blocking, edge-triggered
//! accept loops that park the calling fiber instead of blocking the OS
//! thread, grounded in the raw socket setup a blocking accept4 wrapper
//! would use — just driven through a worker's `Sink` instead of a
//! completion queue.

use crate::sink::{Sink, WaitOutcome};
use crate::stream::Stream;
use crate::worker;
use fiber_error::{ErrorSite, NetError, NetResult};
use std::cell::RefCell;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::rc::Rc;

pub struct Listener {
    fd: OwnedFd,
    sink: Rc<RefCell<Sink>>,
}

// A `Listener` is pinned to the worker that bound it for its entire
// life — the `Rc` here only exists to share the sink with the
// dispatch loop on that same thread, never to send it anywhere. This
// impl exists solely so a `Listener` can be captured in the `Send`
// closure `scheduler::spawn` requires of every fiber entry point, even
// though the fiber it's moved into always runs on this same thread.
unsafe impl Send for Listener {}

impl Listener {
    pub fn bind_inet(addr: Ipv4Addr, port: u16) -> NetResult<Self> {
        let fd = unsafe { raw_socket(libc::AF_INET)? };
        let mut sockaddr: libc::sockaddr_in = unsafe { mem::zeroed() };
        sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
        sockaddr.sin_port = port.to_be();
        sockaddr.sin_addr.s_addr = u32::from_ne_bytes(addr.octets());
        bind_and_listen(&fd, &sockaddr as *const _ as *const libc::sockaddr, mem::size_of_val(&sockaddr) as u32)?;
        Self::from_fd(fd)
    }

    pub fn bind_inet6(addr: Ipv6Addr, port: u16) -> NetResult<Self> {
        let fd = unsafe { raw_socket(libc::AF_INET6)? };
        let mut sockaddr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sockaddr.sin6_port = port.to_be();
        sockaddr.sin6_addr.s6_addr = addr.octets();
        bind_and_listen(&fd, &sockaddr as *const _ as *const libc::sockaddr, mem::size_of_val(&sockaddr) as u32)?;
        Self::from_fd(fd)
    }

    pub fn bind_unix(path: &str) -> NetResult<Self> {
        let fd = unsafe { raw_socket(libc::AF_UNIX)? };
        let mut sockaddr: libc::sockaddr_un = unsafe { mem::zeroed() };
        sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let bytes = path.as_bytes();
        if bytes.len() >= sockaddr.sun_path.len() {
            return Err(NetError::fatal(ErrorSite::Listener, None));
        }
        for (dst, src) in sockaddr.sun_path.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }
        let _ = std::fs::remove_file(path);
        let len = (mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as u32;
        bind_and_listen(&fd, &sockaddr as *const _ as *const libc::sockaddr, len)?;
        Self::from_fd(fd)
    }

    fn from_fd(fd: OwnedFd) -> NetResult<Self> {
        set_nonblocking(fd.as_fd())?;
        let raw = std::os::fd::AsRawFd::as_raw_fd(&fd);
        let w = unsafe { &mut *worker::current() };
        let sink = w.register_fd(raw, &fd);
        Ok(Self { fd, sink })
    }

    /// Accept one connection, parking the calling fiber until one is
    /// available. Retries internally on `EINTR`. The returned `Stream`
    /// is registered with the calling worker's dispatcher — use
    /// [`Self::accept_raw`] when the connection is headed to a
    /// different worker.
    pub fn accept(&self) -> NetResult<Stream> {
        let client = self.accept_raw()?;
        Stream::from_fd(client)
    }

    /// Accept one connection and return the raw fd without registering
    /// it with any worker's dispatcher, for the fan-out accept protocol
    /// in §4.J: the listener's worker accepts, then hands the fd off to
    /// whichever worker will own the connection.
    pub fn accept_raw(&self) -> NetResult<OwnedFd> {
        loop {
            let raw = std::os::fd::AsRawFd::as_raw_fd(&self.fd);
            let client = unsafe {
                libc::accept4(raw, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_CLOEXEC)
            };
            if client >= 0 {
                let client = unsafe { OwnedFd::from_raw_fd(client) };
                set_nonblocking(client.as_fd())?;
                set_tcp_nodelay(client.as_fd());
                return Ok(client);
            }
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::EINTR => continue,
                libc::EAGAIN => {
                    if self.sink.borrow_mut().wait_readable() == WaitOutcome::Error {
                        return Err(NetError::from_errno(ErrorSite::Listener, errno));
                    }
                    continue;
                }
                _ => return Err(NetError::from_errno(ErrorSite::Listener, errno)),
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let raw = std::os::fd::AsRawFd::as_raw_fd(&self.fd);
        let w = unsafe { &mut *worker::current() };
        w.deregister_fd(raw, &self.fd);
    }
}

unsafe fn raw_socket(domain: libc::c_int) -> NetResult<OwnedFd> {
    let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
    if fd < 0 {
        return Err(NetError::last_os_error(ErrorSite::Listener));
    }
    let opt: libc::c_int = 1;
    libc::setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &opt as *const _ as *const libc::c_void,
        mem::size_of_val(&opt) as u32,
    );
    libc::setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEPORT,
        &opt as *const _ as *const libc::c_void,
        mem::size_of_val(&opt) as u32,
    );
    Ok(OwnedFd::from_raw_fd(fd))
}

fn bind_and_listen(fd: &OwnedFd, addr: *const libc::sockaddr, len: u32) -> NetResult<()> {
    let raw = std::os::fd::AsRawFd::as_raw_fd(fd);
    let ret = unsafe { libc::bind(raw, addr, len) };
    if ret != 0 {
        return Err(NetError::last_os_error(ErrorSite::Listener));
    }
    let ret = unsafe { libc::listen(raw, 1024) };
    if ret != 0 {
        return Err(NetError::last_os_error(ErrorSite::Listener));
    }
    Ok(())
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> NetResult<()> {
    let raw = std::os::fd::AsRawFd::as_raw_fd(&fd);
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(NetError::last_os_error(ErrorSite::Socket));
    }
    let ret = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(NetError::last_os_error(ErrorSite::Socket));
    }
    Ok(())
}

pub(crate) fn set_tcp_nodelay(fd: BorrowedFd<'_>) {
    let raw = std::os::fd::AsRawFd::as_raw_fd(&fd);
    let opt: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            raw,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &opt as *const _ as *const libc::c_void,
            mem::size_of_val(&opt) as u32,
        );
    }
}
