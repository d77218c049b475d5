//! Listening sockets. Binding goes through `socket2` so the reuse flags and
//! kernel buffer sizes from [`crate::Options`] can be applied before
//! `bind`/`listen`; the bound socket is then handed to mio in non-blocking
//! mode.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket, UnixListener};
use socket2::{Domain, Protocol as SockProtocol, SockRef, Socket, TcpKeepalive, Type};

use crate::addr::{self, Protocol};
use crate::conn::NetAddr;
use crate::error::Result;
use crate::options::Options;

const LISTEN_BACKLOG: i32 = 1024;

pub(crate) enum Listener {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
    Udp(Arc<UdpSocket>),
}

impl Listener {
    /// Binds a listening socket for `proto` on `raw_addr` with the socket
    /// options from `opts` applied.
    pub fn bind(proto: Protocol, raw_addr: &str, opts: &Options) -> Result<Listener> {
        if proto.is_unix() {
            return Self::bind_unix(raw_addr);
        }
        let sa = addr::resolve(proto, raw_addr)?;
        let domain = Domain::for_address(sa);
        let ty = if proto.is_tcp() { Type::STREAM } else { Type::DGRAM };
        let protocol = if proto.is_tcp() {
            SockProtocol::TCP
        } else {
            SockProtocol::UDP
        };
        let socket = Socket::new(domain, ty, Some(protocol))?;
        socket.set_nonblocking(true)?;
        if opts.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        if opts.reuse_port {
            socket.set_reuse_port(true)?;
        }
        if let Some(size) = opts.socket_recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = opts.socket_send_buffer {
            socket.set_send_buffer_size(size)?;
        }
        socket.bind(&sa.into())?;
        if proto.is_tcp() {
            socket.listen(LISTEN_BACKLOG)?;
            let listener = TcpListener::from_std(socket.into());
            Ok(Listener::Tcp(listener))
        } else {
            let socket = UdpSocket::from_std(socket.into());
            Ok(Listener::Udp(Arc::new(socket)))
        }
    }

    fn bind_unix(path: &str) -> Result<Listener> {
        // A previous run may have left its socket file behind.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(Listener::Unix {
            listener,
            path: PathBuf::from(path),
        })
    }

    pub fn local_addr(&self) -> NetAddr {
        match self {
            Listener::Tcp(l) => l
                .local_addr()
                .map(NetAddr::Inet)
                .unwrap_or(NetAddr::Inet(SocketAddr::from(([0, 0, 0, 0], 0)))),
            Listener::Unix { path, .. } => NetAddr::Unix(Some(path.clone())),
            Listener::Udp(s) => s
                .local_addr()
                .map(NetAddr::Inet)
                .unwrap_or(NetAddr::Inet(SocketAddr::from(([0, 0, 0, 0], 0)))),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix { listener, .. } => listener.as_raw_fd(),
            Listener::Udp(s) => s.as_raw_fd(),
        }
    }

    pub fn source(&mut self) -> &mut dyn Source {
        match self {
            Listener::Tcp(l) => l,
            Listener::Unix { listener, .. } => listener,
            Listener::Udp(s) => Arc::get_mut(s).expect("udp listener registered before sharing"),
        }
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, Listener::Udp(_))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Socket options applied to every accepted TCP stream.
pub(crate) fn setup_tcp_stream(stream: &TcpStream, opts: &Options) -> io::Result<()> {
    stream.set_nodelay(opts.tcp_no_delay)?;
    if let Some(period) = opts.tcp_keep_alive {
        set_keepalive(stream.as_raw_fd(), period)?;
    }
    Ok(())
}

fn set_keepalive(fd: RawFd, period: Duration) -> io::Result<()> {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let sock = SockRef::from(&fd);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(period).with_interval(period))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_tcp_with_reuse_addr() {
        let opts = Options::builder().reuse_addr(true).build();
        let listener = Listener::bind(Protocol::Tcp, "127.0.0.1:0", &opts).unwrap();
        match listener.local_addr() {
            NetAddr::Inet(sa) => assert_ne!(sa.port(), 0),
            other => panic!("unexpected addr {other}"),
        }
    }

    #[test]
    fn reuse_port_allows_parallel_binds() {
        let opts = Options::builder().reuse_port(true).build();
        let first = Listener::bind(Protocol::Tcp, "127.0.0.1:0", &opts).unwrap();
        let NetAddr::Inet(sa) = first.local_addr() else {
            panic!("tcp listener must have an inet addr")
        };
        let second = Listener::bind(Protocol::Tcp, &sa.to_string(), &opts).unwrap();
        assert_eq!(second.local_addr(), first.local_addr());
    }

    #[test]
    fn unix_bind_clears_stale_socket_file() {
        let path = std::env::temp_dir().join("surge-listener-test.sock");
        let path_str = path.to_str().unwrap();
        let first = Listener::bind(Protocol::Unix, path_str, &Options::default()).unwrap();
        drop(first);
        // Recreate a stale file and bind again over it.
        std::fs::write(&path, b"stale").unwrap();
        let second = Listener::bind(Protocol::Unix, path_str, &Options::default()).unwrap();
        drop(second);
        assert!(!path.exists(), "socket file should be removed on drop");
    }

    #[test]
    fn binds_udp() {
        let listener = Listener::bind(Protocol::Udp, "127.0.0.1:0", &Options::default()).unwrap();
        assert!(listener.is_udp());
    }
}
