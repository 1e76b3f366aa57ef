//! # fiber
//!
//! Embedding API for the runtime assembled across `fiber-core`,
//! `fiber-runtime`, and `fiber-net`: a fiber-per-connection server
//! framework exposing a blocking-looking I/O surface over a
//! cooperative, per-core scheduler.
//!
//! A process using this crate builds one [`Domain`], registers zero or
//! more [`Server`]s on it with [`Domain::setup_server`], then calls
//! [`Domain::start`] to spawn the worker threads and
//! [`Domain::run_until_signal`] (or its own loop around
//! [`Domain::is_stopping`]) to block until `SIGINT`/`SIGTERM` or a
//! programmatic [`Domain::stop`] brings it down.
//!
//! ```ignore
//! use fiber::{Domain, Protocol, Server};
//! use std::net::Ipv4Addr;
//!
//! let echo = Protocol::new("echo", |stream| {
//!     let mut buf = [0u8; 4096];
//!     loop {
//!         match stream.read(&mut buf) {
//!             Ok(0) | Err(_) => return,
//!             Ok(n) => { let _ = stream.write_all(&buf[..n]); }
//!         }
//!     }
//! });
//!
//! let mut domain = Domain::init();
//! domain.setup_server(Server::create_inet("echo", echo, Ipv4Addr::UNSPECIFIED, 7000));
//! domain.start();
//! domain.run_until_signal();
//! domain.term();
//! ```

pub use fiber_core::cancel::{CancelState, CancelType};
pub use fiber_core::diag::{self, LogLevel};
pub use fiber_core::id::FiberId;
pub use fiber_core::state::Priority;
pub use fiber_core::{log_debug, log_error, log_info, log_trace, log_warn};
pub use fiber_error::{NetError, NetErrorKind, NetResult};
pub use fiber_net::{Listener, Protocol, ProtocolOptions, ReaderFn, Server};
pub use fiber_runtime::RuntimeConfig;

use fiber_net::{NetWorkerPool, WorkerHook};
use fiber_runtime::control::FiberControlBlock;
use fiber_runtime::scheduler;
use fiber_runtime::tls;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use fiber_net::Stream;

/// `std::process::exit` code for a clean shutdown, per the lifecycle
/// contract: `0` clean, `1` usage or unrecoverable startup error.
pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_FATAL: i32 = 1;

/// Construct a TCP/IPv4 server. Thin wrapper kept for parity with the
/// embedding API's three named constructors; [`Server::create_inet`]
/// does the same thing and is equally public.
pub fn create_inet_server(name: &'static str, proto: Protocol, host: Ipv4Addr, port: u16) -> Server {
    Server::create_inet(name, proto, host, port)
}

pub fn create_inet6_server(name: &'static str, proto: Protocol, host: Ipv6Addr, port: u16) -> Server {
    Server::create_inet6(name, proto, host, port)
}

pub fn create_unix_server(name: &'static str, proto: Protocol, path: impl Into<String>) -> Server {
    Server::create_unix(name, proto, path)
}

/// Open a client connection to a remote TCP peer, parking the calling
/// fiber until the handshake completes. Mirrors the embedding API's
/// `connect` entry for client sockets (`create`/`destroy` are just
/// this `Stream`'s constructor and `Drop`).
pub fn connect(addr: Ipv4Addr, port: u16) -> NetResult<Stream> {
    Stream::connect_inet(addr, port)
}

/// Spawn a fiber on the calling worker. Outside a fiber or a worker's
/// own setup code this returns `Err(SchedError::NotInitialized)`.
pub fn spawn<F>(f: F, priority: Priority) -> fiber_core::error::SchedResult<FiberId>
where
    F: FnOnce(&CancelState) + Send + 'static,
{
    scheduler::spawn(f, priority)
}

#[inline]
pub fn yield_now() {
    scheduler::yield_now()
}

#[inline]
pub fn sleep(duration: Duration) {
    scheduler::sleep(duration)
}

#[inline]
pub fn sleep_ms(ms: u64) {
    scheduler::sleep_ms(ms)
}

#[inline]
pub fn sleep_us(us: u64) {
    scheduler::sleep_us(us)
}

/// Current fiber's id, or `FiberId::NONE` outside a fiber.
#[inline]
pub fn current_fiber() -> FiberId {
    scheduler::current_fiber()
}

/// Request cancellation of `id`. Only callable for a fiber owned by the
/// calling worker; the target observes it at its next [`testcancel`]
/// or suspension point.
pub fn cancel(id: FiberId) -> fiber_core::error::SchedResult<()> {
    scheduler::cancel(id)
}

fn current_cancel_state() -> Option<&'static CancelState> {
    let base = tls::current_fiber_base();
    if base.is_null() {
        return None;
    }
    let block = unsafe { &*(base as *const FiberControlBlock) };
    Some(&block.cancel)
}

/// Explicit cancellation checkpoint. A fiber that wants to be
/// cancellable at a specific point in its own control flow — rather
/// than only at the suspension points `read`/`write`/`sleep` already
/// check — calls this. If cancellation is requested and enabled, this
/// unwinds the calling fiber's cleanup stack and terminates it as
/// cancelled; it never returns to the caller in that case. Outside a
/// fiber, or with nothing pending, it simply returns.
pub fn testcancel() {
    scheduler::testcancel()
}

/// Terminate the calling fiber, running its cleanup records (pushed via
/// [`cleanup_push`]) in LIFO order first. Must be called from within a
/// running fiber.
pub fn exit() -> ! {
    scheduler::exit()
}

/// Push a cleanup record onto the calling fiber's cleanup stack. `routine`
/// runs with `arg` when the fiber later unwinds via [`exit`] or
/// cancellation, or immediately if popped with `cleanup_pop(true)`.
/// No-op outside a fiber.
pub fn cleanup_push(routine: unsafe fn(*mut u8), arg: *mut u8) {
    scheduler::cleanup_push(routine, arg)
}

/// Pop the calling fiber's most recently pushed cleanup record. Runs it
/// immediately if `execute`, otherwise just discards it. No-op outside
/// a fiber.
pub fn cleanup_pop(execute: bool) {
    scheduler::cleanup_pop(execute)
}

/// Enable or disable cancellation of the calling fiber, returning the
/// previous setting. No-op outside a fiber.
pub fn setcancelstate(enabled: bool) -> bool {
    match current_cancel_state() {
        Some(state) => {
            let prev = state.is_enabled();
            state.set_enabled(enabled);
            prev
        }
        None => true,
    }
}

/// Switch the calling fiber between deferred and asynchronous
/// cancellation, returning the previous mode.
pub fn setcanceltype(ty: CancelType) -> CancelType {
    match current_cancel_state() {
        Some(state) => {
            let prev = state.cancel_type();
            state.set_type(ty);
            prev
        }
        None => CancelType::Deferred,
    }
}

/// A hook registered on a [`Domain`], matching §4.K's start/stop hook
/// lists. Runs once per worker thread.
pub type DomainHook = WorkerHook;

struct PendingServer {
    server: Option<Server>,
    unix_path: Option<String>,
}

/// Owns `N` worker threads (one scheduler + dispatcher per core), the
/// set of servers registered onto it, and the process-wide exit flag a
/// `SIGINT`/`SIGTERM` handler flips.
///
/// This is the *regular domain* of §3: exactly one `NetWorkerPool` with
/// one worker per configured core, plus the server bookkeeping and
/// signal wiring the bare pool doesn't need to know about.
pub struct Domain {
    config: RuntimeConfig,
    servers: Arc<Mutex<Vec<PendingServer>>>,
    pool: Option<NetWorkerPool>,
    max_events: usize,
}

static SIGNAL_EXIT: AtomicBool = AtomicBool::new(false);
static SIGNAL_HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SIGNAL_EXIT.store(true, Ordering::Release);
}

fn install_signal_handlers() {
    if SIGNAL_HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}

impl Domain {
    /// Read `RuntimeConfig::from_env()`, install the diagnostic
    /// facility and the `SIGINT`/`SIGTERM` handlers. Matches the
    /// embedding API's `init(argc, argv, options_table)`; option
    /// parsing beyond environment variables is left to the caller,
    /// per §10.3's explicit non-goal of a CLI/JSON config layer.
    pub fn init() -> Self {
        diag::init();
        install_signal_handlers();
        Self {
            config: RuntimeConfig::from_env(),
            servers: Arc::new(Mutex::new(Vec::new())),
            pool: None,
            max_events: 256,
        }
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        diag::init();
        install_signal_handlers();
        Self {
            config,
            servers: Arc::new(Mutex::new(Vec::new())),
            pool: None,
            max_events: 256,
        }
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    /// Register a server to be bound once [`Self::start`] runs.
    /// Matches the embedding API's `setup_server(srv)`.
    pub fn setup_server(&mut self, server: Server) {
        let unix_path = server.unix_path().map(str::to_string);
        self.servers.lock().unwrap().push(PendingServer { server: Some(server), unix_path });
    }

    /// Validate the configuration, spawn one worker thread per
    /// configured core, and bind every registered server on its home
    /// worker. Returns once every worker thread is running; binding
    /// itself happens asynchronously on each server's home worker.
    pub fn start(&mut self) {
        if let Err(e) = self.config.validate() {
            log_error!("fatal startup error: invalid runtime config: {e:?}");
            std::process::exit(EXIT_FATAL);
        }

        let num_workers = self.config.num_workers;
        let max_events = self.max_events;

        // Start hook: each worker, once activated, binds every
        // registered server whose home_worker matches its own id.
        // `Option::take` under the shared mutex means exactly one
        // worker's hook wins the race for each server.
        let servers_for_start = Arc::clone(&self.servers);
        let on_start: DomainHook = Arc::new(move |worker_id, _net_worker, handles| {
            let mut pending = servers_for_start.lock().unwrap();
            for slot in pending.iter_mut() {
                let Some(server) = &slot.server else { continue };
                if server.home_worker(num_workers) != worker_id {
                    continue;
                }
                let server = slot.server.take().unwrap();
                server.start(Arc::clone(handles), worker_id);
            }
        });

        let on_stop: DomainHook = Arc::new(|worker_id, _net_worker, _handles| {
            log_info!("worker {worker_id} stop hook running");
        });

        let pool = NetWorkerPool::start(self.config.clone(), max_events, on_start, on_stop);
        self.pool = Some(pool);
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn is_stopping(&self) -> bool {
        SIGNAL_EXIT.load(Ordering::Acquire) || self.pool.as_ref().is_some_and(|p| p.is_stopping())
    }

    /// Programmatic shutdown equivalent to a received `SIGTERM`.
    pub fn stop(&self) {
        SIGNAL_EXIT.store(true, Ordering::Release);
        if let Some(pool) = &self.pool {
            pool.stop();
        }
    }

    /// Block the launcher thread, flushing diagnostics periodically,
    /// until the exit flag is set by a signal or [`Self::stop`]. Then
    /// tear down: stop every worker, join all worker threads, and
    /// unlink any Unix-domain listener paths. Matches §4.K's launcher
    /// thread and the graceful-shutdown scenario of §8.
    pub fn run_until_signal(&mut self) {
        while !SIGNAL_EXIT.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(50));
        }
        self.stop();
    }

    /// Join every worker thread and clean up Unix-domain socket paths.
    /// Matches the embedding API's `term()`.
    pub fn term(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
        for slot in self.servers.lock().unwrap().drain(..) {
            if let Some(path) = slot.unix_path {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}
