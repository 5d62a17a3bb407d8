//! Peer address codec (§4.A): decoding the compact peer list a tracker
//! returns, and rendering individual peer addresses.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{Error, Result};

/// A single peer's endpoint, as decoded from the tracker's compact peer
/// list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddr(SocketAddrV4);

impl PeerAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        self.0
    }

    /// Decodes a compact peer list buffer.
    ///
    /// Each peer is a fixed 6-byte record: a 4-byte big-endian IPv4 address
    /// followed by a 2-byte big-endian port. Fails with
    /// [`Error::MalformedPeers`] if the buffer's length isn't a multiple of
    /// 6.
    pub fn parse_compact(buf: &[u8]) -> Result<Vec<Self>> {
        const PEER_SIZE: usize = 6;
        if buf.len() % PEER_SIZE != 0 {
            return Err(Error::MalformedPeers);
        }
        Ok(buf
            .chunks_exact(PEER_SIZE)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                Self::new(ip, port)
            })
            .collect())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.ip(), self.0.port())
    }
}
