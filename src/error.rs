use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the surge runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying socket or poller operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The address part of `scheme://addr` could not be parsed or resolved.
    #[error("invalid network address: {0}")]
    InvalidAddress(String),
    /// Unknown scheme in `scheme://addr`.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    /// A configuration option failed validation at startup.
    #[error("invalid option: {0}")]
    InvalidOption(String),
    /// Requested event-loop count exceeds the supported ceiling.
    #[error("too many event loops: {0}")]
    TooManyEventLoops(usize),
    /// Another engine in this process is already serving the address.
    #[error("address already served by a running engine: {0}")]
    AddressInUse(String),
    /// Write or similar operation on a connection that is closing or closed.
    #[error("connection is closed")]
    ConnClosed,
    /// Fewer bytes are buffered than the caller asked for.
    #[error("not enough buffered bytes")]
    ShortBuffer,
    /// The operation has no meaning for this transport.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// Stop was called on an engine that is already shutting down or gone.
    #[error("engine is in shutdown")]
    EngineInShutdown,
    /// No running engine is bound to the given address.
    #[error("no engine is bound to {0}")]
    EngineNotRunning(String),
    /// The engine did not finish shutting down before the stop deadline.
    #[error("engine stop deadline exceeded")]
    StopTimeout,
    /// Close cause handed to `on_close` when the engine shuts down.
    #[error("engine stopped")]
    EngineStopped,
}

impl Error {
    /// True for the cause delivered to `on_close` during engine shutdown.
    pub fn is_engine_stopped(&self) -> bool {
        matches!(self, Error::EngineStopped)
    }
}
