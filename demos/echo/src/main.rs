//! Echo server example.
//!
//! A single protocol whose reader fiber echoes every line it reads back
//! to the peer. One server, workers as configured by `FIBRT_*` env vars.
//!
//! # Environment variables
//!
//! - `FIBRT_NUM_WORKERS=<n>` - worker threads (default: number of cores)
//! - `FIBRT_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace
//! - `ECHO_PORT=<port>` - listen port (default: 7000)
//!
//! Test with:
//!     cargo run --release -p fibrt-demo-echo
//!     printf 'hello\n' | nc localhost 7000

use fiber::{log_info, log_warn, Domain, Protocol, Server};
use fiber_core::env::env_get;
use std::net::Ipv4Addr;

fn main() {
    let port: u16 = env_get("ECHO_PORT", 7000u16);

    let echo = Protocol::new("echo", |stream| {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if !e.kind.is_retryable() {
                        log_warn!("echo connection dropped: {e:?}");
                    }
                    return;
                }
            }
        }
    });

    let mut domain = Domain::init();
    domain.setup_server(Server::create_inet("echo", echo, Ipv4Addr::UNSPECIFIED, port));
    domain.start();

    log_info!("echo server listening on 0.0.0.0:{port} with {} workers", domain.num_workers());
    domain.run_until_signal();
    domain.term();
}
