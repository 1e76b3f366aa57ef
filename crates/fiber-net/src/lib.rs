//! # fiber-net
//!
//! The edge-triggered event dispatcher, per-fd readiness sinks, socket
//! listener/stream wrappers, cross-worker work queues, and the
//! server/worker-pool lifecycle that ties them to `fiber-runtime`'s
//! scheduler — components F through K of the runtime core.
//!
//! Every public type here is reached through one worker's thread-local
//! [`worker::current`] pointer; none of it is safe to touch from a
//! thread other than the one that created it; cross-worker
//! communication happens exclusively through [`queue::WorkQueueHandle`].
//!
//! ## Modules
//!
//! - `dispatcher` - epoll abstraction (component F)
//! - `selfpipe` - eventfd cross-worker wakeup (component G)
//! - `queue` - per-worker work queues (component H)
//! - `sink` - per-fd readiness state machine (component I)
//! - `listener` / `stream` - non-blocking sockets built on `sink` (component I)
//! - `server` - listening servers and their accept fibers (component J)
//! - `worker` - the bundle tying a scheduler to a dispatcher (component K)
//! - `pool` - the worker-thread/domain lifecycle (component K)

#![allow(dead_code)]

pub mod dispatcher;
pub mod selfpipe;
pub mod queue;
pub mod sink;
pub mod listener;
pub mod stream;
pub mod server;
pub mod worker;
pub mod pool;

pub use dispatcher::{DispatchEvent, Dispatcher, Readiness};
pub use listener::Listener;
pub use pool::{NetWorkerPool, WorkerHook};
pub use queue::{WorkItem, WorkQueue, WorkQueueHandle};
pub use selfpipe::SelfPipe;
pub use server::{Protocol, ProtocolOptions, ReaderFn, Server};
pub use sink::{Sink, WaitOutcome};
pub use stream::Stream;
pub use worker::NetWorker;
