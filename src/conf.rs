//! This module defines the tunable constants and configuration for the
//! engine and its parts (§6 "Tunable constants").

use std::time::Duration;

use rand::Rng;

use crate::PeerId;

/// The default leech_core client id.
pub const LEECH_CORE_CLIENT_ID: &PeerId = b"-LC0001-000000000000";

/// Generates a fresh Azureus-style peer id: the 8-byte `LEECH_CORE_CLIENT_ID`
/// prefix followed by 12 random bytes, per the guidelines in
/// [BEP 20](http://bittorrent.org/beps/bep_0020.html).
///
/// `TorrentInfo::peer_id` only needs to be unique per session (§3), so
/// callers that don't care about announcing a stable client id can use this
/// instead of [`LEECH_CORE_CLIENT_ID`] directly.
pub fn random_peer_id() -> PeerId {
    let mut id = *LEECH_CORE_CLIENT_ID;
    rand::thread_rng().fill(&mut id[8..]);
    id
}

/// Dial timeout for the initial TCP connection to a peer.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for the combined handshake write+read.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for receiving the peer's initial bitfield message.
pub const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for downloading a single piece on one connection.
pub const PIECE_TIMEOUT: Duration = Duration::from_secs(30);

/// The global configuration for the engine and all its sessions.
#[derive(Clone, Debug)]
pub struct Conf {
    pub engine: EngineConf,
    pub session: SessionConf,
}

impl Conf {
    /// Returns the configuration with reasonable defaults, using the default
    /// leech_core client id, [`LEECH_CORE_CLIENT_ID`].
    pub fn new() -> Self {
        Self {
            engine: EngineConf {
                client_id: *LEECH_CORE_CLIENT_ID,
            },
            session: SessionConf::default(),
        }
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration related to the engine itself.
#[derive(Clone, Debug)]
pub struct EngineConf {
    /// The ID of the client to announce to peers during the handshake.
    pub client_id: PeerId,
}

/// Per-session configuration: the deadlines and pipelining limits specified
/// in §6. These are fixed by the protocol this crate implements, but are
/// kept configurable the way the teacher's `TorrentConf` keeps its tunables,
/// so callers embedding this crate (or its tests) can exercise different
/// timing without touching the session code itself.
#[derive(Clone, Copy, Debug)]
pub struct SessionConf {
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub bitfield_timeout: Duration,
    pub piece_timeout: Duration,
    pub max_block_size: u32,
    pub max_backlog: usize,
}

impl Default for SessionConf {
    fn default() -> Self {
        Self {
            dial_timeout: DIAL_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            bitfield_timeout: BITFIELD_TIMEOUT,
            piece_timeout: PIECE_TIMEOUT,
            max_block_size: crate::MAX_BLOCK_SIZE,
            max_backlog: crate::MAX_BACKLOG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conf_uses_spec_constants() {
        let conf = Conf::default();
        assert_eq!(conf.session.max_block_size, 16384);
        assert_eq!(conf.session.max_backlog, 5);
        assert_eq!(conf.session.handshake_timeout, Duration::from_secs(3));
        assert_eq!(conf.session.bitfield_timeout, Duration::from_secs(5));
        assert_eq!(conf.session.piece_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_random_peer_id_keeps_client_prefix_and_varies_suffix() {
        let a = random_peer_id();
        let b = random_peer_id();
        assert_eq!(&a[..8], &LEECH_CORE_CLIENT_ID[..8]);
        assert_ne!(&a[8..], &b[8..]);
    }
}
