//! Per-socket connection state: elastic inbound/outbound buffers, address
//! snapshots, the opaque user context slot, and the thread-safe handle used
//! to reach a connection from outside its loop.
//!
//! A `Conn` is only ever touched by the loop thread that owns it. Code on
//! other threads goes through [`ConnHandle`], which submits work to the
//! owning loop instead of mutating shared state.

use std::any::Any;
use std::fmt;
use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mio::event::Source;
use mio::net::{TcpStream, UdpSocket, UnixStream};
use mio::Token;

use crate::addr::Protocol;
use crate::buffer::ElasticBuffer;
use crate::error::{Error, Result};
use crate::poll::Trigger;
use crate::pool::chunk_pool;

/// Most outbound slices handed to one vectored write.
const MAX_IOVECS: usize = 64;

/// Address of one endpoint, either an IP socket address or a Unix path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetAddr {
    Inet(SocketAddr),
    /// Unnamed or unbound Unix endpoints carry no path.
    Unix(Option<PathBuf>),
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Inet(sa) => write!(f, "{sa}"),
            NetAddr::Unix(Some(path)) => write!(f, "{}", path.display()),
            NetAddr::Unix(None) => write!(f, "@"),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(sa: SocketAddr) -> Self {
        NetAddr::Inet(sa)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Open,
    Closing,
    Closed,
}

pub(crate) enum SocketKind {
    Tcp(TcpStream),
    Unix(UnixStream),
    /// Virtual per-datagram carrier; writes address the original sender.
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

impl SocketKind {
    fn send(&mut self, p: &[u8]) -> io::Result<usize> {
        match self {
            SocketKind::Tcp(s) => s.write(p),
            SocketKind::Unix(s) => s.write(p),
            SocketKind::Udp { socket, peer } => socket.send_to(p, *peer),
        }
    }

    fn sendv(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            SocketKind::Tcp(s) => s.write_vectored(bufs),
            SocketKind::Unix(s) => s.write_vectored(bufs),
            SocketKind::Udp { socket, peer } => {
                let flat: Vec<u8> = bufs.iter().flat_map(|b| b.iter().copied()).collect();
                socket.send_to(&flat, *peer)
            }
        }
    }
}

pub struct Conn {
    pub(crate) token: Token,
    pub(crate) state: State,
    pub(crate) registered_write: bool,
    socket: SocketKind,
    local: NetAddr,
    remote: NetAddr,
    inbound: ElasticBuffer,
    outbound: ElasticBuffer,
    context: Option<Box<dyn Any + Send>>,
    pending_err: Option<io::Error>,
    trigger: Option<Arc<Trigger>>,
    scratch: Vec<u8>,
}

impl Conn {
    pub(crate) fn new_tcp(
        stream: TcpStream,
        token: Token,
        local: NetAddr,
        remote: NetAddr,
        read_cap: usize,
        write_cap: usize,
        trigger: Arc<Trigger>,
    ) -> Self {
        Self::new_stream(SocketKind::Tcp(stream), token, local, remote, read_cap, write_cap, trigger)
    }

    pub(crate) fn new_unix(
        stream: UnixStream,
        token: Token,
        local: NetAddr,
        remote: NetAddr,
        read_cap: usize,
        write_cap: usize,
        trigger: Arc<Trigger>,
    ) -> Self {
        Self::new_stream(SocketKind::Unix(stream), token, local, remote, read_cap, write_cap, trigger)
    }

    fn new_stream(
        socket: SocketKind,
        token: Token,
        local: NetAddr,
        remote: NetAddr,
        read_cap: usize,
        write_cap: usize,
        trigger: Arc<Trigger>,
    ) -> Self {
        Self {
            token,
            state: State::Open,
            registered_write: false,
            socket,
            local,
            remote,
            inbound: ElasticBuffer::new(read_cap),
            outbound: ElasticBuffer::new(write_cap),
            context: None,
            pending_err: None,
            trigger: Some(trigger),
            scratch: Vec::new(),
        }
    }

    /// Builds the short-lived carrier for one inbound datagram.
    pub(crate) fn new_udp(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        local: NetAddr,
        read_cap: usize,
        write_cap: usize,
    ) -> Self {
        Self {
            token: Token(0),
            state: State::Open,
            registered_write: false,
            socket: SocketKind::Udp { socket, peer },
            local,
            remote: NetAddr::Inet(peer),
            inbound: ElasticBuffer::new(read_cap),
            outbound: ElasticBuffer::new(write_cap),
            context: None,
            pending_err: None,
            trigger: None,
            scratch: Vec::new(),
        }
    }

    /// Address of the local endpoint, captured at accept time.
    pub fn local_addr(&self) -> &NetAddr {
        &self.local
    }

    /// Address of the peer, captured at accept time.
    pub fn remote_addr(&self) -> &NetAddr {
        &self.remote
    }

    pub fn protocol(&self) -> Protocol {
        match self.socket {
            SocketKind::Tcp(_) => Protocol::Tcp,
            SocketKind::Unix(_) => Protocol::Unix,
            SocketKind::Udp { .. } => Protocol::Udp,
        }
    }

    /// Bytes waiting in the inbound buffer.
    pub fn inbound_buffered(&self) -> usize {
        self.inbound.buffered()
    }

    /// Bytes queued for the peer but not yet written to the socket.
    pub fn outbound_buffered(&self) -> usize {
        self.outbound.buffered()
    }

    /// Consumes `n` inbound bytes (all of them for `None`) and returns them
    /// as one slice, valid until the next call on this connection. Bytes
    /// that sit unwrapped in the ring are borrowed directly; only data that
    /// wraps or has spilled into the chunk list is assembled into a scratch
    /// copy.
    pub fn next(&mut self, n: Option<usize>) -> Result<&[u8]> {
        let buffered = self.inbound.buffered();
        let n = n.unwrap_or(buffered);
        if n > buffered {
            return Err(Error::ShortBuffer);
        }
        if n > 0 && self.inbound.front_contiguous_len() >= n {
            return self.inbound.take_contiguous(n).ok_or(Error::ShortBuffer);
        }
        self.scratch.clear();
        let mut remaining = n;
        for slice in self.inbound.peek(n) {
            let take = slice.len().min(remaining);
            self.scratch.extend_from_slice(&slice[..take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
        self.inbound.discard(n);
        Ok(&self.scratch[..n])
    }

    /// Non-consuming view of up to `n` inbound bytes (all for `None`). The
    /// result may span several slices when the data wraps or has spilled.
    pub fn peek(&self, n: Option<usize>) -> Vec<&[u8]> {
        let n = n.unwrap_or(usize::MAX);
        let mut out = self.inbound.peek(n);
        let mut total = 0;
        for i in 0..out.len() {
            if total + out[i].len() >= n {
                out[i] = &out[i][..n - total];
                out.truncate(i + 1);
                break;
            }
            total += out[i].len();
        }
        out
    }

    /// Drops `n` inbound bytes; returns how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        self.inbound.discard(n)
    }

    /// Drains the inbound buffer into `w`. The flag is true when a short
    /// write stopped the drain with the remainder still buffered.
    pub fn write_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<(usize, bool)> {
        self.inbound.write_to(w)
    }

    /// Queues `p` for the peer. When nothing was pending, one non-blocking
    /// send is attempted immediately and only the residue is buffered. For
    /// UDP the payload goes out as a single datagram to the sender.
    pub fn write(&mut self, p: &[u8]) -> Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        if matches!(self.socket, SocketKind::Udp { .. }) {
            return Ok(self.socket.send(p)?);
        }
        if !self.outbound.is_empty() {
            self.outbound.write(p);
            return Ok(p.len());
        }
        let mut sent = 0;
        while sent < p.len() {
            match self.socket.send(&p[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail(e)),
            }
        }
        if sent < p.len() {
            self.outbound.write(&p[sent..]);
        }
        Ok(p.len())
    }

    /// Vectored variant of [`Conn::write`], preserving slice order.
    pub fn writev(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        if total == 0 {
            return Ok(0);
        }
        self.ensure_open()?;
        if matches!(self.socket, SocketKind::Udp { .. }) {
            let ios: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();
            return Ok(self.socket.sendv(&ios)?);
        }
        if !self.outbound.is_empty() {
            self.outbound.writev(bufs);
            return Ok(total);
        }
        let ios: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();
        let sent = match self.socket.sendv(&ios) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(self.fail(e)),
        };
        if sent < total {
            let mut skip = sent;
            for b in bufs {
                if skip >= b.len() {
                    skip -= b.len();
                    continue;
                }
                self.outbound.write(&b[skip..]);
                skip = 0;
            }
        }
        Ok(total)
    }

    /// Sends one datagram to an explicit destination instead of the
    /// original sender. Only meaningful for UDP connections.
    pub fn send_to(&mut self, dest: SocketAddr, p: &[u8]) -> Result<usize> {
        match &self.socket {
            SocketKind::Udp { socket, .. } => Ok(socket.send_to(p, dest)?),
            _ => Err(Error::Unsupported("send_to on a stream connection")),
        }
    }

    /// Stores an arbitrary value on this connection. Replaces any previous
    /// context.
    pub fn set_context<T: Any + Send>(&mut self, ctx: T) {
        self.context = Some(Box::new(ctx));
    }

    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref()
    }

    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_mut()?.downcast_mut()
    }

    pub fn take_context(&mut self) -> Option<Box<dyn Any + Send>> {
        self.context.take()
    }

    /// Cloneable handle for use from other threads.
    pub fn handle(&self) -> ConnHandle {
        match (&self.socket, &self.trigger) {
            (SocketKind::Udp { socket, peer }, _) => ConnHandle {
                inner: HandleInner::Udp {
                    socket: Arc::clone(socket),
                    peer: *peer,
                },
            },
            (_, Some(trigger)) => ConnHandle {
                inner: HandleInner::Stream {
                    token: self.token,
                    trigger: Arc::clone(trigger),
                },
            },
            // Loop-owned stream connections always carry a trigger.
            (_, None) => unreachable!("stream connection without an owning loop"),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            _ => Err(Error::ConnClosed),
        }
    }

    fn fail(&mut self, e: io::Error) -> Error {
        self.state = State::Closing;
        self.pending_err = Some(io::Error::new(e.kind(), e.to_string()));
        Error::Io(e)
    }

    // Loop-side plumbing below.

    pub(crate) fn feed_inbound(&mut self, p: &[u8]) {
        self.inbound.write(p);
    }

    pub(crate) fn socket_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.socket {
            SocketKind::Tcp(s) => s.read(buf),
            SocketKind::Unix(s) => s.read(buf),
            SocketKind::Udp { .. } => unreachable!("datagram carriers never read the socket"),
        }
    }

    /// Writes as much queued output as the socket accepts. `Ok(true)` means
    /// the outbound buffer is fully drained.
    pub(crate) fn flush_outbound(&mut self) -> io::Result<bool> {
        loop {
            if self.outbound.is_empty() {
                return Ok(true);
            }
            let n = {
                let slices = self.outbound.peek(usize::MAX);
                let ios: Vec<IoSlice<'_>> = slices
                    .iter()
                    .take(MAX_IOVECS)
                    .map(|s| IoSlice::new(s))
                    .collect();
                match self.socket.sendv(&ios) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                return Ok(false);
            }
            self.outbound.discard(n);
        }
    }

    pub(crate) fn want_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub(crate) fn source(&mut self) -> &mut dyn Source {
        match &mut self.socket {
            SocketKind::Tcp(s) => s,
            SocketKind::Unix(s) => s,
            SocketKind::Udp { .. } => unreachable!("datagram carriers are never registered"),
        }
    }

    pub(crate) fn take_pending_err(&mut self) -> Option<io::Error> {
        self.pending_err.take()
    }

    /// Returns buffers to their pools. Runs at teardown after `on_close`.
    pub(crate) fn release(&mut self) {
        self.inbound.release();
        self.outbound.release();
    }
}

impl io::Read for Conn {
    /// Reads buffered inbound bytes; never touches the socket.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.inbound.read(buf))
    }
}

impl io::Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(|e| match e {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::NotConnected, other.to_string()),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_outbound().map(|_| ())
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("token", &self.token.0)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("inbound", &self.inbound.buffered())
            .field("outbound", &self.outbound.buffered())
            .finish()
    }
}

/// Thread-safe entry point to a connection owned by some loop.
///
/// All methods may be called from any thread; effects are applied on the
/// owning loop. Operations on a connection that has already gone away are
/// silently dropped.
#[derive(Clone)]
pub struct ConnHandle {
    inner: HandleInner,
}

#[derive(Clone)]
enum HandleInner {
    Stream {
        token: Token,
        trigger: Arc<Trigger>,
    },
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

impl ConnHandle {
    /// Copies `p` and queues it for transmission on the owning loop.
    pub fn async_write(&self, p: &[u8]) -> Result<()> {
        match &self.inner {
            HandleInner::Stream { token, trigger } => {
                let mut chunk = chunk_pool().acquire();
                chunk.extend_from_slice(p);
                let token = *token;
                trigger.submit(Box::new(move |reactor| {
                    reactor.conn_async_write(token, &chunk);
                }));
                Ok(())
            }
            HandleInner::Udp { socket, peer } => {
                socket.send_to(p, *peer)?;
                Ok(())
            }
        }
    }

    /// Vectored [`ConnHandle::async_write`]; slices are sent back to back.
    pub fn async_writev(&self, bufs: &[&[u8]]) -> Result<()> {
        let mut chunk = chunk_pool().acquire();
        for b in bufs {
            chunk.extend_from_slice(b);
        }
        match &self.inner {
            HandleInner::Stream { token, trigger } => {
                let token = *token;
                trigger.submit(Box::new(move |reactor| {
                    reactor.conn_async_write(token, &chunk);
                }));
                Ok(())
            }
            HandleInner::Udp { socket, peer } => {
                socket.send_to(&chunk, *peer)?;
                Ok(())
            }
        }
    }

    /// Schedules an `on_traffic` callback even though no bytes arrived.
    pub fn wake(&self) -> Result<()> {
        match &self.inner {
            HandleInner::Stream { token, trigger } => {
                let token = *token;
                trigger.submit(Box::new(move |reactor| reactor.conn_wake(token)));
                Ok(())
            }
            HandleInner::Udp { .. } => Err(Error::Unsupported("wake on a udp connection")),
        }
    }

    /// Closes the connection from any thread; `on_close` fires on the loop.
    pub fn close(&self) -> Result<()> {
        match &self.inner {
            HandleInner::Stream { token, trigger } => {
                let token = *token;
                trigger.submit(Box::new(move |reactor| reactor.conn_close(token, None)));
                Ok(())
            }
            HandleInner::Udp { .. } => Ok(()),
        }
    }
}
