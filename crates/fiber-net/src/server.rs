//! Listening servers and their accept fibers (component J).
//!
//! A [`Server`] bundles a listener address, a protocol's reader
//! callback, and an affinity mask of workers allowed to own it. Binding
//! happens through [`Server::bind`] on the worker chosen at startup (the
//! affinity mask's first set bit, worker 0 by default); that worker then
//! spawns the accept fiber itself, matching §4.J's "submit a
//! `register_work` item to that worker" lifecycle rather than binding
//! from whichever thread calls `setup_server`.

use crate::listener::Listener;
use crate::queue::WorkQueueHandle;
use crate::stream::Stream;
use crate::worker;
use fiber_core::state::Priority;
use fiber_core::{log_info, log_warn};
use fiber_error::NetResult;
use fiber_runtime::scheduler;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type ReaderFn = Arc<dyn Fn(Stream) + Send + Sync + 'static>;

/// Socket/placement options enumerated in §4.I. `bound` is this crate's
/// `FIXED_LISTENER`: §9's "Open question" adopts the newer strict
/// ownership model, so `bound` defaults to `true` for every server
/// built through [`Server::new`] — round-robin placement is opt-in via
/// [`Server::round_robin`].
#[derive(Debug, Clone, Copy)]
pub struct ProtocolOptions {
    pub keepalive: bool,
    pub nodelay: bool,
    pub bound: bool,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self { keepalive: true, nodelay: true, bound: true }
    }
}

/// The protocol vtable supplied by user code. §9's second open question
/// folds the source's separate single-fire `writer`-only path into this
/// same shape: a protocol whose `reader` does one write and returns is
/// indistinguishable from it, so only one callable slot is exposed.
#[derive(Clone)]
pub struct Protocol {
    pub name: &'static str,
    pub options: ProtocolOptions,
    pub reader: ReaderFn,
}

impl Protocol {
    pub fn new(name: &'static str, reader: impl Fn(Stream) + Send + Sync + 'static) -> Self {
        Self { name, options: ProtocolOptions::default(), reader: Arc::new(reader) }
    }

    pub fn with_options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }
}

enum Address {
    Inet(Ipv4Addr, u16),
    Inet6(Ipv6Addr, u16),
    Unix(String),
}

/// A configured server: address + protocol + affinity, not yet bound to
/// any worker. Constructors mirror §6's embedding API
/// (`create_inet_server`, `create_inet6_server`, `create_unix_server`).
pub struct Server {
    name: &'static str,
    addr: Address,
    protocol: Protocol,
    affinity: Vec<usize>,
}

impl Server {
    pub fn create_inet(name: &'static str, protocol: Protocol, host: Ipv4Addr, port: u16) -> Self {
        Self { name, addr: Address::Inet(host, port), protocol, affinity: vec![0] }
    }

    pub fn create_inet6(name: &'static str, protocol: Protocol, host: Ipv6Addr, port: u16) -> Self {
        Self { name, addr: Address::Inet6(host, port), protocol, affinity: vec![0] }
    }

    pub fn create_unix(name: &'static str, protocol: Protocol, path: impl Into<String>) -> Self {
        Self { name, addr: Address::Unix(path.into()), protocol, affinity: vec![0] }
    }

    /// Restrict which workers may bind this server's listener. The
    /// first set bit (in ascending worker-id order) wins at bind time.
    pub fn affinity(mut self, workers: impl IntoIterator<Item = usize>) -> Self {
        self.affinity = workers.into_iter().collect();
        self
    }

    /// Let accepted connections round-robin across every worker instead
    /// of staying pinned to this listener's worker.
    pub fn round_robin(mut self) -> Self {
        self.protocol.options.bound = false;
        self
    }

    /// The bind path, for callers that need to `unlink` it on shutdown
    /// (Unix-domain listeners only; `None` for inet/inet6 servers).
    pub fn unix_path(&self) -> Option<&str> {
        match &self.addr {
            Address::Unix(path) => Some(path.as_str()),
            _ => None,
        }
    }

    fn bind_listener(&self) -> NetResult<Listener> {
        match &self.addr {
            Address::Inet(host, port) => Listener::bind_inet(*host, *port),
            Address::Inet6(host, port) => Listener::bind_inet6(*host, *port),
            Address::Unix(path) => Listener::bind_unix(path),
        }
    }

    /// Worker id chosen to own this server's listener: the first set
    /// bit of the affinity mask, clamped into range, default worker 0.
    pub fn home_worker(&self, num_workers: usize) -> usize {
        self.affinity
            .iter()
            .copied()
            .find(|&w| w < num_workers)
            .unwrap_or(0)
    }

    /// Bind the listener and spawn the accept fiber on the calling
    /// worker. Must run on `self.home_worker(..)`'s thread — called from
    /// a `NetWorkerPool` start hook or a work item delivered to it.
    pub fn start(self, handles: Arc<Vec<WorkQueueHandle>>, my_worker: usize) {
        let listener = match self.bind_listener() {
            Ok(l) => l,
            Err(e) => {
                log_warn!("server {}: bind failed: {e:?}", self.name);
                return;
            }
        };
        log_info!("server {} listening on worker {my_worker}", self.name);

        let name = self.name;
        let protocol = self.protocol;
        let _ = scheduler::spawn(
            move |_cancel| accept_loop(name, listener, protocol, handles, my_worker),
            Priority::LOW,
        );
    }
}

/// Round-robin cursor for non-bound servers, shared by every accept
/// fiber in the process (there is normally exactly one per server).
static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

fn accept_loop(
    name: &'static str,
    listener: Listener,
    protocol: Protocol,
    handles: Arc<Vec<WorkQueueHandle>>,
    my_worker: usize,
) {
    loop {
        let fd = match listener.accept_raw() {
            Ok(fd) => fd,
            Err(e) => {
                if e.kind.is_retryable() {
                    scheduler::yield_now();
                    continue;
                }
                log_warn!("server {name}: accept failed: {e:?}");
                scheduler::yield_now();
                continue;
            }
        };

        let target = if protocol.options.bound {
            my_worker
        } else {
            NEXT_WORKER.fetch_add(1, Ordering::Relaxed) % handles.len().max(1)
        };

        let reader = Arc::clone(&protocol.reader);
        if target == my_worker {
            spawn_reader(fd, reader);
        } else {
            let delivered = handles[target].run(move || spawn_reader(fd, reader));
            if !delivered {
                log_warn!("server {name}: work queue full, dropping accepted connection");
            }
        }
    }
}

/// Runs on the connection's owning worker: wrap the fd into a `Stream`
/// (registering it with *this* worker's dispatcher) and spawn the
/// protocol's reader fiber over it.
fn spawn_reader(fd: std::os::fd::OwnedFd, reader: ReaderFn) {
    debug_assert!(!worker::current().is_null(), "spawn_reader must run on an active NetWorker thread");
    let stream = match Stream::from_fd(fd) {
        Ok(s) => s,
        Err(e) => {
            log_warn!("failed to register accepted connection: {e:?}");
            return;
        }
    };
    let _ = scheduler::spawn(move |_cancel| (reader)(stream), Priority::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_protocol() -> Protocol {
        Protocol::new("test", |_stream| {})
    }

    #[test]
    fn home_worker_defaults_to_zero() {
        let server = Server::create_inet("s", noop_protocol(), Ipv4Addr::LOCALHOST, 0);
        assert_eq!(server.home_worker(4), 0);
    }

    #[test]
    fn home_worker_honors_affinity() {
        let server = Server::create_inet("s", noop_protocol(), Ipv4Addr::LOCALHOST, 0).affinity([2, 3]);
        assert_eq!(server.home_worker(4), 2);
    }

    #[test]
    fn home_worker_skips_out_of_range_bits() {
        let server = Server::create_inet("s", noop_protocol(), Ipv4Addr::LOCALHOST, 0).affinity([9, 1]);
        assert_eq!(server.home_worker(4), 1);
    }

    #[test]
    fn unix_path_only_set_for_unix_servers() {
        let inet = Server::create_inet("s", noop_protocol(), Ipv4Addr::LOCALHOST, 0);
        assert_eq!(inet.unix_path(), None);

        let unix = Server::create_unix("s", noop_protocol(), "/tmp/fibrt-test.sock");
        assert_eq!(unix.unix_path(), Some("/tmp/fibrt-test.sock"));
    }

    #[test]
    fn round_robin_clears_bound_option() {
        let server = Server::create_inet("s", noop_protocol(), Ipv4Addr::LOCALHOST, 0);
        assert!(server.protocol.options.bound);
        let server = server.round_robin();
        assert!(!server.protocol.options.bound);
    }

    #[test]
    fn protocol_options_default_to_fixed_listener() {
        let options = ProtocolOptions::default();
        assert!(options.bound);
        assert!(options.keepalive);
        assert!(options.nodelay);
    }
}
