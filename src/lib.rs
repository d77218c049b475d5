//! Event-driven networking framework built on a pool of single-threaded
//! reactors. Each loop owns one OS readiness poller and its set of
//! connections; new connections are spread across loops by a pluggable
//! balancer and never migrate afterwards.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     User Application                     │
//! │        implements EventHandler (on_open, on_traffic,     │
//! │        on_close, on_tick, ...)                           │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ callbacks on the owning loop thread
//! ┌───────────────▼──────────────────────────────────────────┐
//! │                         Engine                           │
//! │  ┌─────────┐   ┌─────────┐          ┌─────────┐          │
//! │  │ Loop 0  │   │ Loop 1  │   ...    │ Loop N  │          │
//! │  │ poller  │   │ poller  │          │ poller  │          │
//! │  │ conns   │   │ conns   │          │ conns   │          │
//! │  │ tasks   │   │ tasks   │          │ tasks   │          │
//! │  └────┬────┘   └────┬────┘          └────┬────┘          │
//! │       │ listener    │  ▲ cross-thread ingress via        │
//! │       │ (loop 0, or │  │ task queue + waker              │
//! │       │  all under  │  │ (ConnHandle, Engine::stop)      │
//! │       │  port reuse)│  │                                 │
//! └───────┼─────────────┴──┴─────────────────────────────────┘
//!         ▼
//!   OS readiness multiplexer (epoll/kqueue via mio)
//! ```
//!
//! Inbound bytes land in a per-connection elastic buffer (a pooled ring
//! that spills into a chunk list under burst) and are handed to
//! `on_traffic`; outbound writes try the socket immediately and queue the
//! residue, with write interest armed only while something is pending.
//!
//! # Example
//!
//! ```rust,no_run
//! use surge::{run, Action, Conn, EventHandler, Options};
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_traffic(&self, conn: &mut Conn) -> Action {
//!         if let Ok(data) = conn.next(None).map(<[u8]>::to_vec) {
//!             let _ = conn.write(&data);
//!         }
//!         Action::None
//!     }
//! }
//!
//! fn main() -> surge::Result<()> {
//!     run(Echo, "tcp://127.0.0.1:9000", Options::default())
//! }
//! ```

pub mod addr;
pub mod balancer;
pub mod buffer;
pub mod conn;
pub mod engine;
pub mod error;
pub mod handler;
pub mod logging;
pub mod options;
pub mod pool;

mod eventloop;
mod listener;
mod poll;

pub use addr::Protocol;
pub use balancer::LoadBalancing;
pub use conn::{Conn, ConnHandle, NetAddr};
pub use engine::{run, stop, Engine};
pub use error::{Error, Result};
pub use handler::{Action, EventHandler};
pub use logging::{LogLevel, Logger, NoopLogger, StderrLogger};
pub use options::{Options, OptionsBuilder};
