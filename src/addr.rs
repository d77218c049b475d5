//! Parsing of `scheme://addr` bind targets.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// Transport selected by the address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
}

impl Protocol {
    pub fn is_tcp(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tcp4 | Protocol::Tcp6)
    }

    pub fn is_udp(self) -> bool {
        matches!(self, Protocol::Udp | Protocol::Udp4 | Protocol::Udp6)
    }

    pub fn is_unix(self) -> bool {
        matches!(self, Protocol::Unix)
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" => Some(Protocol::Tcp),
            "tcp4" => Some(Protocol::Tcp4),
            "tcp6" => Some(Protocol::Tcp6),
            "udp" => Some(Protocol::Udp),
            "udp4" => Some(Protocol::Udp4),
            "udp6" => Some(Protocol::Udp6),
            "unix" => Some(Protocol::Unix),
            _ => None,
        }
    }
}

/// Splits `scheme://addr` into a protocol and the raw address part.
pub fn parse(addr: &str) -> Result<(Protocol, &str)> {
    let (scheme, rest) = addr
        .split_once("://")
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))?;
    let proto =
        Protocol::from_scheme(scheme).ok_or_else(|| Error::UnsupportedProtocol(scheme.to_string()))?;
    if rest.is_empty() {
        return Err(Error::InvalidAddress(addr.to_string()));
    }
    Ok((proto, rest))
}

/// Resolves the address part of a TCP/UDP target to one socket address,
/// honoring the family restriction of `tcp4`/`udp6`-style schemes. A bare
/// `:port` binds the wildcard address.
pub fn resolve(proto: Protocol, addr: &str) -> Result<SocketAddr> {
    let owned;
    let target = if addr.starts_with(':') {
        let host = match proto {
            Protocol::Tcp6 | Protocol::Udp6 => "[::]",
            _ => "0.0.0.0",
        };
        owned = format!("{host}{addr}");
        owned.as_str()
    } else {
        addr
    };
    let candidates = target
        .to_socket_addrs()
        .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
    let wanted_v4 = matches!(proto, Protocol::Tcp4 | Protocol::Udp4);
    let wanted_v6 = matches!(proto, Protocol::Tcp6 | Protocol::Udp6);
    candidates
        .into_iter()
        .find(|sa| {
            if wanted_v4 {
                sa.is_ipv4()
            } else if wanted_v6 {
                sa.is_ipv6()
            } else {
                true
            }
        })
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))
}
