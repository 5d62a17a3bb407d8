//! The core's error taxonomy.
//!
//! cratetorrent itself has no `thiserror` dependency and hand-rolls its
//! `Error` type with manual `Display`/`std::error::Error` impls; this module
//! follows the same approach rather than pulling in a new crate for it.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The errors the core may produce.
///
/// Most variants here are *transient session errors* in the taxonomy of the
/// design: they cause a single peer session to terminate and its in-flight
/// work item, if any, to be re-queued. They are never fatal to the
/// coordinator. The exceptions are explicitly called out on each variant.
#[derive(Debug)]
pub enum Error {
    /// The compact peer list buffer's length wasn't a multiple of 6.
    ///
    /// Input error: reported before any connection is opened.
    MalformedPeers,
    /// The torrent descriptor violated the
    /// `ceil(total_length / piece_length) == len(piece_hashes)` invariant.
    ///
    /// Input error: reported before any connection is opened.
    InvalidTorrentInfo,
    /// The stream ended before a complete message could be read.
    Truncated,
    /// A message violated one of the wire protocol's structural checks.
    /// The string names the violated check for diagnostics.
    ProtocolViolation(&'static str),
    /// The handshake's pstr-length or protocol string didn't match.
    BadHandshake,
    /// The peer's advertised info hash didn't match ours.
    InfoHashMismatch,
    /// The combined handshake write+read didn't complete within 3 seconds.
    HandshakeTimeout,
    /// The first message received after the handshake wasn't a bitfield.
    ExpectedBitfield,
    /// The per-piece 30 second deadline elapsed before the piece completed.
    PieceTimeout,
    /// An I/O error occurred on the peer connection.
    Io(std::io::Error),
    /// Every session terminated before the download completed: the
    /// coordinator has no live producer left and would otherwise hang
    /// forever.
    ///
    /// Coordinator-level error: fatal to the download.
    NoProgress,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPeers => {
                write!(f, "compact peer list length is not a multiple of 6")
            }
            Self::InvalidTorrentInfo => write!(
                f,
                "torrent descriptor violates the piece count invariant"
            ),
            Self::Truncated => {
                write!(f, "stream ended before a complete message was read")
            }
            Self::ProtocolViolation(check) => {
                write!(f, "protocol violation: {}", check)
            }
            Self::BadHandshake => write!(f, "malformed handshake"),
            Self::InfoHashMismatch => {
                write!(f, "peer's info hash does not match ours")
            }
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::ExpectedBitfield => write!(
                f,
                "expected a bitfield as the first post-handshake message"
            ),
            Self::PieceTimeout => write!(f, "piece download timed out"),
            Self::Io(e) => write!(f, "i/o error: {}", e),
            Self::NoProgress => write!(
                f,
                "all peer sessions terminated before the download completed"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        // Callers map this to the more specific HandshakeTimeout/PieceTimeout
        // variant where the distinction matters; this blanket impl exists so
        // that `?` works at call sites that don't care which deadline fired.
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "operation timed out",
        ))
    }
}
