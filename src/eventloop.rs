//! The per-thread event loop. Each `Reactor` owns one poller, one connection
//! table and optionally a listener; everything it owns is touched only from
//! its thread. The cycle is: run due ticks, block for readiness, dispatch
//! events, drain cross-thread tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpStream, UnixStream};
use mio::{Events, Token};

use crate::conn::{Conn, NetAddr, State};
use crate::engine::{Engine, EngineShared};
use crate::error::Error;
use crate::handler::Action;
use crate::listener::{setup_tcp_stream, Listener};
use crate::logging::LogLevel;
use crate::poll::{Poller, FIRST_CONN, LISTENER, WAKER};

const EVENTS_CAPACITY: usize = 1024;
const READ_BUFFER_SIZE: usize = 64 * 1024;

enum ReadOutcome {
    Eof,
    Again,
    Retry,
    Fail(std::io::Error),
    Traffic(Action),
    Gone,
}

pub(crate) struct Reactor {
    idx: usize,
    poller: Poller,
    conns: HashMap<Token, Conn>,
    next_token: usize,
    listener: Option<Listener>,
    shared: Arc<EngineShared>,
    conn_count: Arc<AtomicUsize>,
    scratch: Vec<u8>,
    next_tick: Option<Instant>,
}

impl Reactor {
    pub fn new(
        idx: usize,
        poller: Poller,
        listener: Option<Listener>,
        shared: Arc<EngineShared>,
    ) -> Self {
        let conn_count = Arc::clone(&shared.loops[idx].conn_count);
        Self {
            idx,
            poller,
            conns: HashMap::new(),
            next_token: FIRST_CONN,
            listener,
            shared,
            conn_count,
            scratch: vec![0; READ_BUFFER_SIZE],
            next_tick: None,
        }
    }

    pub fn run(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            if let Err(e) = self.poller.add_read(listener.source(), LISTENER) {
                self.shared
                    .log(LogLevel::Error, &format!("loop {}: listener registration failed: {e}", self.idx));
                self.shared.begin_shutdown();
            }
        }

        if self.idx == 0 {
            let engine = Engine::from_shared(Arc::clone(&self.shared));
            if self.shared.handler.on_boot(&engine) == Action::Shutdown {
                self.shared.begin_shutdown();
            }
        }

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        while !self.shared.shutdown_requested() {
            let timeout = self.run_due_ticks();
            if let Err(e) = self.poller.poll(&mut events, timeout) {
                self.shared
                    .log(LogLevel::Error, &format!("loop {}: poll failed: {e}", self.idx));
                continue;
            }
            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                if self.shared.force_closing() {
                    break;
                }
                match token {
                    WAKER => self.drain_tasks(),
                    LISTENER => self.listener_ready(),
                    _ => {
                        if readable {
                            self.read_ready(token);
                        }
                        if writable {
                            self.write_ready(token);
                        }
                    }
                }
            }
        }
        self.teardown();
    }

    /// Fires `on_tick` when due; returns the poll timeout until the next one.
    fn run_due_ticks(&mut self) -> Option<Duration> {
        if !(self.shared.opts.ticker && self.idx == 0) {
            return None;
        }
        let now = Instant::now();
        if self.next_tick.map_or(true, |at| at <= now) {
            let (delay, action) = self.shared.handler.on_tick();
            if action == Action::Shutdown {
                self.shared.begin_shutdown();
            }
            self.next_tick = Some(Instant::now() + delay);
        }
        Some(self.next_tick.unwrap().saturating_duration_since(Instant::now()))
    }

    fn drain_tasks(&mut self) {
        let trigger = self.poller.trigger();
        trigger.begin_drain();
        while let Some(task) = trigger.pop_task() {
            task(self);
        }
    }

    fn listener_ready(&mut self) {
        if self.listener.as_ref().is_some_and(|l| l.is_udp()) {
            self.datagrams_ready();
        } else {
            self.accept_ready();
        }
    }

    /// Accepts until the kernel runs dry, placing each connection on the
    /// loop the balancer picks.
    fn accept_ready(&mut self) {
        loop {
            if self.shared.force_closing() {
                return;
            }
            enum Accepted {
                Tcp(TcpStream, SocketAddr),
                Unix(UnixStream, NetAddr),
            }
            let accepted = {
                let result = match self.listener.as_ref() {
                    Some(Listener::Tcp(l)) => {
                        l.accept().map(|(s, peer)| Accepted::Tcp(s, peer))
                    }
                    Some(Listener::Unix { listener, .. }) => listener.accept().map(|(s, peer)| {
                        let path = peer.as_pathname().map(std::path::PathBuf::from);
                        Accepted::Unix(s, NetAddr::Unix(path))
                    }),
                    _ => return,
                };
                match result {
                    Ok(accepted) => accepted,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.shared
                            .log(LogLevel::Error, &format!("loop {}: accept failed: {e}", self.idx));
                        return;
                    }
                }
            };
            match accepted {
                Accepted::Tcp(stream, peer) => {
                    if let Err(e) = setup_tcp_stream(&stream, &self.shared.opts) {
                        self.shared
                            .log(LogLevel::Warn, &format!("socket option on accept failed: {e}"));
                    }
                    let remote = NetAddr::Inet(peer);
                    let target = self.shared.pick_loop(&remote);
                    // The target is charged here, not when the task drains,
                    // so back-to-back accepts see up-to-date loads.
                    self.shared.loops[target]
                        .conn_count
                        .fetch_add(1, Ordering::Relaxed);
                    if target == self.idx {
                        self.register_tcp(stream, peer);
                    } else {
                        self.shared.loops[target].trigger.submit(Box::new(
                            move |reactor| reactor.register_tcp(stream, peer),
                        ));
                    }
                }
                Accepted::Unix(stream, remote) => {
                    let target = self.shared.pick_loop(&remote);
                    self.shared.loops[target]
                        .conn_count
                        .fetch_add(1, Ordering::Relaxed);
                    if target == self.idx {
                        self.register_unix(stream, remote);
                    } else {
                        self.shared.loops[target].trigger.submit(Box::new(
                            move |reactor| reactor.register_unix(stream, remote),
                        ));
                    }
                }
            }
        }
    }

    /// Reads datagrams until the kernel runs dry. Every datagram becomes a
    /// short-lived connection carrying the payload; `on_close` never fires.
    fn datagrams_ready(&mut self) {
        loop {
            if self.shared.force_closing() {
                return;
            }
            let (n, peer, socket) = {
                let Some(Listener::Udp(socket)) = self.listener.as_ref() else {
                    return;
                };
                match socket.recv_from(&mut self.scratch) {
                    Ok((n, peer)) => (n, peer, Arc::clone(socket)),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.shared
                            .log(LogLevel::Error, &format!("loop {}: recvfrom failed: {e}", self.idx));
                        return;
                    }
                }
            };
            let local = self.listener.as_ref().map(|l| l.local_addr()).unwrap();
            let mut conn = Conn::new_udp(
                socket,
                peer,
                local,
                self.shared.opts.read_buffer_cap,
                self.shared.opts.write_buffer_cap,
            );
            conn.feed_inbound(&self.scratch[..n]);
            if self.shared.handler.on_traffic(&mut conn) == Action::Shutdown {
                self.shared.begin_shutdown();
            }
            conn.release();
        }
    }

    pub(crate) fn register_tcp(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let token = self.alloc_token();
        if let Err(e) = self.poller.add_read(&mut stream, token) {
            self.shared
                .log(LogLevel::Error, &format!("connection registration failed: {e}"));
            self.conn_count.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        let local = stream
            .local_addr()
            .map(NetAddr::Inet)
            .unwrap_or(NetAddr::Inet(peer));
        let conn = Conn::new_tcp(
            stream,
            token,
            local,
            NetAddr::Inet(peer),
            self.shared.opts.read_buffer_cap,
            self.shared.opts.write_buffer_cap,
            self.poller.trigger(),
        );
        self.install(token, conn);
    }

    pub(crate) fn register_unix(&mut self, mut stream: UnixStream, remote: NetAddr) {
        let token = self.alloc_token();
        if let Err(e) = self.poller.add_read(&mut stream, token) {
            self.shared
                .log(LogLevel::Error, &format!("connection registration failed: {e}"));
            self.conn_count.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        let local = self
            .listener
            .as_ref()
            .map(|l| l.local_addr())
            .unwrap_or(NetAddr::Unix(None));
        let conn = Conn::new_unix(
            stream,
            token,
            local,
            remote,
            self.shared.opts.read_buffer_cap,
            self.shared.opts.write_buffer_cap,
            self.poller.trigger(),
        );
        self.install(token, conn);
    }

    fn install(&mut self, token: Token, conn: Conn) {
        // The connection was already counted at accept-dispatch time.
        self.conns.insert(token, conn);

        let (initial, action) = {
            let conn = self.conns.get_mut(&token).unwrap();
            self.shared.handler.on_open(conn)
        };
        if let Some(bytes) = initial {
            if let Some(conn) = self.conns.get_mut(&token) {
                let _ = conn.write(&bytes);
            }
        }
        self.finish_callback(token, action);
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Reads until the socket runs dry, feeding inbound and firing
    /// `on_traffic` after every successful chunk.
    fn read_ready(&mut self, token: Token) {
        loop {
            if self.shared.force_closing() {
                break;
            }
            let outcome = {
                match self.conns.get_mut(&token) {
                    None => ReadOutcome::Gone,
                    Some(conn) if conn.state != State::Open => ReadOutcome::Again,
                    Some(conn) => match conn.socket_recv(&mut self.scratch) {
                        Ok(0) => ReadOutcome::Eof,
                        Ok(n) => {
                            conn.feed_inbound(&self.scratch[..n]);
                            ReadOutcome::Traffic(self.shared.handler.on_traffic(conn))
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => ReadOutcome::Again,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => ReadOutcome::Retry,
                        Err(e) => ReadOutcome::Fail(e),
                    },
                }
            };
            match outcome {
                ReadOutcome::Gone => return,
                ReadOutcome::Eof => {
                    self.close_conn(token, None);
                    return;
                }
                ReadOutcome::Fail(e) => {
                    self.close_conn(token, Some(Error::Io(e)));
                    return;
                }
                ReadOutcome::Again => break,
                ReadOutcome::Retry => continue,
                ReadOutcome::Traffic(action) => match action {
                    Action::None => {}
                    Action::Close => {
                        self.close_conn(token, None);
                        return;
                    }
                    Action::Shutdown => {
                        self.shared.begin_shutdown();
                    }
                },
            }
        }
        self.post_io(token);
    }

    fn write_ready(&mut self, token: Token) {
        let result = {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            conn.flush_outbound()
        };
        match result {
            Ok(_) => self.post_io(token),
            Err(e) => self.close_conn(token, Some(Error::Io(e))),
        }
    }

    /// Applies the action a callback returned, then the usual post-I/O
    /// bookkeeping.
    fn finish_callback(&mut self, token: Token, action: Action) {
        match action {
            Action::None => {}
            Action::Close => {
                self.close_conn(token, None);
                return;
            }
            Action::Shutdown => {
                self.shared.begin_shutdown();
            }
        }
        self.post_io(token);
    }

    /// Closes a connection that failed mid-callback, otherwise keeps the
    /// poller's write interest in line with the outbound buffer.
    fn post_io(&mut self, token: Token) {
        let pending = match self.conns.get_mut(&token) {
            Some(conn) if conn.state == State::Closing => {
                Some(conn.take_pending_err().map(Error::Io))
            }
            Some(_) => None,
            None => return,
        };
        if let Some(cause) = pending {
            self.close_conn(token, cause);
            return;
        }
        self.sync_interest(token);
    }

    fn sync_interest(&mut self, token: Token) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        let want = conn.want_write();
        if want == conn.registered_write {
            return;
        }
        conn.registered_write = want;
        let result = if want {
            self.poller.mod_read_write(conn.source(), token)
        } else {
            self.poller.mod_read(conn.source(), token)
        };
        if let Err(e) = result {
            self.shared
                .log(LogLevel::Error, &format!("interest update failed: {e}"));
        }
    }

    /// Single exit point for a stream connection: best-effort flush, poller
    /// removal, exactly one `on_close`, buffers back to their pools.
    fn close_conn(&mut self, token: Token, cause: Option<Error>) {
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        let _ = conn.flush_outbound();
        let _ = self.poller.delete(conn.source());
        conn.state = State::Closed;
        let action = self.shared.handler.on_close(&mut conn, cause.as_ref());
        self.conn_count.fetch_sub(1, Ordering::Relaxed);
        conn.release();
        if action == Action::Shutdown {
            self.shared.begin_shutdown();
        }
    }

    // Task-queue entry points, invoked on this loop's thread.

    pub(crate) fn conn_async_write(&mut self, token: Token, data: &[u8]) {
        let gone = match self.conns.get_mut(&token) {
            Some(conn) if conn.state == State::Open => {
                let _ = conn.write(data);
                false
            }
            _ => true,
        };
        if !gone {
            self.post_io(token);
        }
    }

    pub(crate) fn conn_wake(&mut self, token: Token) {
        let action = {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            self.shared.handler.on_traffic(conn)
        };
        self.finish_callback(token, action);
    }

    pub(crate) fn conn_close(&mut self, token: Token, cause: Option<Error>) {
        self.close_conn(token, cause);
    }

    /// Shutdown path: drop the listener, deliver `on_close` to every live
    /// connection. The cause records whether this was a graceful stop or a
    /// forced close after the stop deadline expired.
    fn teardown(&mut self) {
        self.listener = None;
        let forced = self.shared.force_closing();
        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        for token in tokens {
            let cause = if forced {
                Error::StopTimeout
            } else {
                Error::EngineStopped
            };
            self.close_conn(token, Some(cause));
        }
    }
}
