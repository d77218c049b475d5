//! Logging seam. The library never picks a logging frontend; users plug one
//! in through [`Logger`] and the engine reports accept failures, poller
//! retries and lifecycle transitions through it.

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger trait for runtime events.
///
/// Library users can implement this trait to route messages into whatever
/// logging stack they already run.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default no-op logger that discards all messages.
#[derive(Default, Clone)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Convenience logger that writes to standard error.
#[derive(Default, Clone)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        eprintln!("[{level:?}] {message}");
    }
}
