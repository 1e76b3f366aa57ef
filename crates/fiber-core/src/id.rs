//! Fiber identifier type

use core::fmt;

/// Unique identifier for a fiber, stable within the worker that owns it.
///
/// Two fibers on different workers may reuse the same numeric id; identity
/// is only meaningful together with a worker id. The maximum value is
/// reserved as a sentinel for "no fiber".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u32);

impl FiberId {
    /// Sentinel value indicating no fiber.
    pub const NONE: FiberId = FiberId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        FiberId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u32::MAX
    }

    #[inline]
    pub const fn to_option(self) -> Option<FiberId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for FiberId {
    #[inline]
    fn from(id: u32) -> Self {
        FiberId(id)
    }
}

impl From<FiberId> for u32 {
    #[inline]
    fn from(id: FiberId) -> Self {
        id.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(NONE)")
        } else {
            write!(f, "FiberId({})", self.0)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basics() {
        let id = FiberId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(id.as_usize(), 42);
        assert!(!id.is_none());
        assert!(id.is_some());
    }

    #[test]
    fn none_sentinel() {
        let none = FiberId::NONE;
        assert!(none.is_none());
        assert!(!none.is_some());
        assert_eq!(none.to_option(), None);
        assert_eq!(FiberId::default(), FiberId::NONE);
    }

    #[test]
    fn conversions() {
        let id: FiberId = 100u32.into();
        let raw: u32 = id.into();
        assert_eq!(raw, 100);
    }
}
