//! The callback contract between the runtime and user code.

use std::time::Duration;

use crate::conn::Conn;
use crate::engine::Engine;
use crate::error::Error;

/// Directive returned from callbacks to steer the connection or the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep going.
    #[default]
    None,
    /// Close this connection after a best-effort flush of pending output.
    Close,
    /// Shut the whole engine down.
    Shutdown,
}

/// Event callbacks implemented by the application.
///
/// Every method has a no-op default, so implementations override only what
/// they need. All callbacks run on the event-loop thread that owns the
/// connection and must not block; hand long work to an external pool and
/// feed results back through [`crate::ConnHandle`].
pub trait EventHandler: Send + Sync + 'static {
    /// Called once when the engine is ready to accept connections.
    fn on_boot(&self, engine: &Engine) -> Action {
        let _ = engine;
        Action::None
    }

    /// Called once after every loop has exited.
    fn on_shutdown(&self, engine: &Engine) {
        let _ = engine;
    }

    /// Called when a connection is established. Returned bytes are queued
    /// ahead of any other output.
    fn on_open(&self, conn: &mut Conn) -> (Option<Vec<u8>>, Action) {
        let _ = conn;
        (None, Action::None)
    }

    /// Called exactly once when a TCP or Unix connection goes away. `err`
    /// is `None` for a clean close. Never called for UDP.
    fn on_close(&self, conn: &mut Conn, err: Option<&Error>) -> Action {
        let _ = (conn, err);
        Action::None
    }

    /// Called when inbound bytes are available, and on [`crate::ConnHandle::wake`]
    /// with no new bytes.
    fn on_traffic(&self, conn: &mut Conn) -> Action {
        let _ = conn;
        Action::None
    }

    /// Called on the ticker loop when the ticker is enabled. Returns the
    /// delay until the next tick.
    fn on_tick(&self) -> (Duration, Action) {
        (Duration::from_secs(1), Action::None)
    }
}
