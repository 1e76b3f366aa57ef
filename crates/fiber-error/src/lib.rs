//! # fiber-error
//!
//! Site-tagged I/O error type and per-connection metrics shared by
//! `fiber-net`'s dispatcher, listener, and socket sink layers.
//!
//! `NetError` is a small `Copy` struct — `(site, kind, errno)` — rather
//! than a generic catch-all: the dispatcher/socket error handling design
//! calls for a handful of distinguishable error sites, each carrying an
//! OS errno where relevant, matched directly rather than through a
//! generic code registry.

mod error;
mod site;

pub mod metrics;

pub use error::{NetError, NetErrorKind, NetResult};
pub use site::ErrorSite;
