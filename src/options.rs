//! Engine configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::balancer::LoadBalancing;
use crate::error::{Error, Result};
use crate::logging::{Logger, NoopLogger};

/// Hard ceiling on the event-loop count.
pub(crate) const MAX_EVENT_LOOPS: usize = 10_000;

const DEFAULT_BUFFER_CAP: usize = 64 * 1024;

/// Configuration for an engine.
///
/// Use [`Options::builder`] for ergonomic construction; unset fields fall
/// back to the values of [`Options::default`].
#[derive(Clone)]
pub struct Options {
    /// Size the loop pool to the CPU count when `num_event_loops` is unset.
    pub multicore: bool,
    /// Exact loop count; zero means derive from `multicore`.
    pub num_event_loops: usize,
    /// Keep each loop pinned to its own OS thread.
    pub lock_os_thread: bool,
    /// Bind one listener per loop with SO_REUSEPORT (TCP/UDP only).
    pub reuse_port: bool,
    /// Set SO_REUSEADDR on listeners.
    pub reuse_addr: bool,
    /// Fire `on_tick` on the primary loop.
    pub ticker: bool,
    /// Enable TCP keepalive with this period on accepted connections.
    pub tcp_keep_alive: Option<Duration>,
    /// Disable Nagle's algorithm on accepted connections.
    pub tcp_no_delay: bool,
    /// How new connections are spread across loops.
    pub load_balancing: LoadBalancing,
    /// Inbound elastic-buffer watermark in bytes.
    pub read_buffer_cap: usize,
    /// Outbound elastic-buffer watermark in bytes.
    pub write_buffer_cap: usize,
    /// SO_RCVBUF for listener and accepted sockets.
    pub socket_recv_buffer: Option<usize>,
    /// SO_SNDBUF for listener and accepted sockets.
    pub socket_send_buffer: Option<usize>,
    /// Sink for runtime diagnostics.
    pub logger: Arc<dyn Logger>,
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Final loop count for this configuration.
    pub(crate) fn loop_count(&self) -> usize {
        if self.num_event_loops > 0 {
            self.num_event_loops
        } else if self.multicore {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            1
        }
    }

    /// Startup validation; all configuration errors surface here.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.lock_os_thread && self.num_event_loops > MAX_EVENT_LOOPS {
            return Err(Error::TooManyEventLoops(self.num_event_loops));
        }
        if self.read_buffer_cap == 0 || self.write_buffer_cap == 0 {
            return Err(Error::InvalidOption(
                "buffer watermarks must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            multicore: false,
            num_event_loops: 0,
            lock_os_thread: false,
            reuse_port: false,
            reuse_addr: false,
            ticker: false,
            tcp_keep_alive: None,
            tcp_no_delay: true,
            load_balancing: LoadBalancing::default(),
            read_buffer_cap: DEFAULT_BUFFER_CAP,
            write_buffer_cap: DEFAULT_BUFFER_CAP,
            socket_recv_buffer: None,
            socket_send_buffer: None,
            logger: Arc::new(NoopLogger),
        }
    }
}

/// Builder for [`Options`].
pub struct OptionsBuilder {
    multicore: Option<bool>,
    num_event_loops: Option<usize>,
    lock_os_thread: Option<bool>,
    reuse_port: Option<bool>,
    reuse_addr: Option<bool>,
    ticker: Option<bool>,
    tcp_keep_alive: Option<Option<Duration>>,
    tcp_no_delay: Option<bool>,
    load_balancing: Option<LoadBalancing>,
    read_buffer_cap: Option<usize>,
    write_buffer_cap: Option<usize>,
    socket_recv_buffer: Option<usize>,
    socket_send_buffer: Option<usize>,
    logger: Option<Arc<dyn Logger>>,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self {
            multicore: None,
            num_event_loops: None,
            lock_os_thread: None,
            reuse_port: None,
            reuse_addr: None,
            ticker: None,
            tcp_keep_alive: None,
            tcp_no_delay: None,
            load_balancing: None,
            read_buffer_cap: None,
            write_buffer_cap: None,
            socket_recv_buffer: None,
            socket_send_buffer: None,
            logger: None,
        }
    }

    pub fn multicore(mut self, enabled: bool) -> Self {
        self.multicore = Some(enabled);
        self
    }

    pub fn num_event_loops(mut self, count: usize) -> Self {
        self.num_event_loops = Some(count);
        self
    }

    pub fn lock_os_thread(mut self, enabled: bool) -> Self {
        self.lock_os_thread = Some(enabled);
        self
    }

    pub fn reuse_port(mut self, enabled: bool) -> Self {
        self.reuse_port = Some(enabled);
        self
    }

    pub fn reuse_addr(mut self, enabled: bool) -> Self {
        self.reuse_addr = Some(enabled);
        self
    }

    pub fn ticker(mut self, enabled: bool) -> Self {
        self.ticker = Some(enabled);
        self
    }

    pub fn tcp_keep_alive(mut self, period: Option<Duration>) -> Self {
        self.tcp_keep_alive = Some(period);
        self
    }

    pub fn tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = Some(enabled);
        self
    }

    pub fn load_balancing(mut self, policy: LoadBalancing) -> Self {
        self.load_balancing = Some(policy);
        self
    }

    pub fn read_buffer_cap(mut self, cap: usize) -> Self {
        self.read_buffer_cap = Some(cap);
        self
    }

    pub fn write_buffer_cap(mut self, cap: usize) -> Self {
        self.write_buffer_cap = Some(cap);
        self
    }

    pub fn socket_recv_buffer(mut self, size: usize) -> Self {
        self.socket_recv_buffer = Some(size);
        self
    }

    pub fn socket_send_buffer(mut self, size: usize) -> Self {
        self.socket_send_buffer = Some(size);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Options {
        let default = Options::default();
        Options {
            multicore: self.multicore.unwrap_or(default.multicore),
            num_event_loops: self.num_event_loops.unwrap_or(default.num_event_loops),
            lock_os_thread: self.lock_os_thread.unwrap_or(default.lock_os_thread),
            reuse_port: self.reuse_port.unwrap_or(default.reuse_port),
            reuse_addr: self.reuse_addr.unwrap_or(default.reuse_addr),
            ticker: self.ticker.unwrap_or(default.ticker),
            tcp_keep_alive: self.tcp_keep_alive.unwrap_or(default.tcp_keep_alive),
            tcp_no_delay: self.tcp_no_delay.unwrap_or(default.tcp_no_delay),
            load_balancing: self.load_balancing.unwrap_or(default.load_balancing),
            read_buffer_cap: self.read_buffer_cap.unwrap_or(default.read_buffer_cap),
            write_buffer_cap: self.write_buffer_cap.unwrap_or(default.write_buffer_cap),
            socket_recv_buffer: self.socket_recv_buffer.or(default.socket_recv_buffer),
            socket_send_buffer: self.socket_send_buffer.or(default.socket_send_buffer),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
