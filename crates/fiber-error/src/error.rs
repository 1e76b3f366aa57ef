//! `NetError`: a small, site-tagged I/O error for the dispatcher and
//! socket layers (component F/I/J).
//!
//! Per-connection errors are classified into [`NetErrorKind`] variants
//! that match the §7 taxonomy (retry, yield, log-and-continue) instead of
//! carrying a free-form message; the raw errno is kept alongside for
//! diagnostics.

use crate::site::ErrorSite;
use core::fmt;

/// Result alias for I/O-facing operations.
pub type NetResult<T> = Result<T, NetError>;

/// Classification of a raw errno, matching the recoverable-error taxonomy
/// in the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetErrorKind {
    /// `EINTR`: the caller should retry the syscall.
    Interrupted,
    /// `EAGAIN`/`EWOULDBLOCK`: no progress possible right now; park or
    /// yield and wait for the next readiness event.
    WouldBlock,
    /// `ECONNRESET`/`ECONNABORTED`: the peer reset the connection.
    ConnectionReset,
    /// `EPIPE`: write to a half-closed connection.
    BrokenPipe,
    /// `ETIMEDOUT`: a configured read/write timeout elapsed.
    TimedOut,
    /// `EBADF` on an already-closed descriptor.
    Closed,
    /// Startup-fatal: bind, listen, epoll/eventfd creation failed.
    Fatal,
    /// Anything else; `errno` carries the raw value.
    Other,
}

impl NetErrorKind {
    /// Classify a raw errno value (Linux) into a [`NetErrorKind`].
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINTR => NetErrorKind::Interrupted,
            libc::EAGAIN | libc::EWOULDBLOCK => NetErrorKind::WouldBlock,
            libc::ECONNRESET | libc::ECONNABORTED => NetErrorKind::ConnectionReset,
            libc::EPIPE => NetErrorKind::BrokenPipe,
            libc::ETIMEDOUT => NetErrorKind::TimedOut,
            libc::EBADF => NetErrorKind::Closed,
            _ => NetErrorKind::Other,
        }
    }

    /// Whether §7 treats this as retryable by the caller rather than
    /// terminal for the connection.
    pub fn is_retryable(self) -> bool {
        matches!(self, NetErrorKind::Interrupted | NetErrorKind::WouldBlock)
    }
}

impl fmt::Display for NetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetErrorKind::Interrupted => "interrupted",
            NetErrorKind::WouldBlock => "would block",
            NetErrorKind::ConnectionReset => "connection reset",
            NetErrorKind::BrokenPipe => "broken pipe",
            NetErrorKind::TimedOut => "timed out",
            NetErrorKind::Closed => "descriptor closed",
            NetErrorKind::Fatal => "fatal",
            NetErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A site-tagged I/O error. Cheap to construct and copy: no heap
/// allocation, no message string — the `(site, kind, errno)` triple is
/// enough to both log and match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetError {
    pub site: ErrorSite,
    pub kind: NetErrorKind,
    pub errno: Option<i32>,
}

impl NetError {
    pub const fn new(site: ErrorSite, kind: NetErrorKind, errno: Option<i32>) -> Self {
        Self { site, kind, errno }
    }

    /// Build from the last OS error, classifying it at `site`.
    pub fn last_os_error(site: ErrorSite) -> Self {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self::from_errno(site, errno)
    }

    /// Build from an explicit errno value, classifying it at `site`.
    pub fn from_errno(site: ErrorSite, errno: i32) -> Self {
        Self::new(site, NetErrorKind::from_errno(errno), Some(errno))
    }

    pub const fn fatal(site: ErrorSite, errno: Option<i32>) -> Self {
        Self::new(site, NetErrorKind::Fatal, errno)
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno {
            Some(errno) => write!(f, "{}: {} (errno {})", self.site, self.kind, errno),
            None => write!(f, "{}: {}", self.site, self.kind),
        }
    }
}

impl std::error::Error for NetError {}

impl From<NetError> for std::io::Error {
    fn from(e: NetError) -> Self {
        match e.errno {
            Some(errno) => std::io::Error::from_raw_os_error(errno),
            None => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_errnos() {
        assert_eq!(NetErrorKind::from_errno(libc::EAGAIN), NetErrorKind::WouldBlock);
        assert_eq!(NetErrorKind::from_errno(libc::EINTR), NetErrorKind::Interrupted);
        assert_eq!(
            NetErrorKind::from_errno(libc::ECONNRESET),
            NetErrorKind::ConnectionReset
        );
        assert_eq!(NetErrorKind::from_errno(libc::EPIPE), NetErrorKind::BrokenPipe);
    }

    #[test]
    fn retryable_kinds() {
        assert!(NetErrorKind::WouldBlock.is_retryable());
        assert!(NetErrorKind::Interrupted.is_retryable());
        assert!(!NetErrorKind::ConnectionReset.is_retryable());
    }

    #[test]
    fn display_includes_errno() {
        let e = NetError::new(ErrorSite::Socket, NetErrorKind::TimedOut, Some(110));
        assert_eq!(format!("{}", e), "socket: timed out (errno 110)");
    }
}
