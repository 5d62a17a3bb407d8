pub mod conf;
pub mod coordinator;
pub mod engine;
pub mod error;
mod peer;
pub mod peers;
pub mod torrent;

use bitvec::prelude::{BitVec, Msb0};

pub use coordinator::DownloadProgress;
pub use engine::{download, download_with_progress};
pub use error::{Error, Result};
pub use peers::PeerAddr;
pub use torrent::{PieceResult, PieceWork, TorrentInfo};

/// The type of a piece's index.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in
/// the source code we use `usize` to be consistent with other index types in
/// Rust.
pub type PieceIndex = usize;

/// The peer ID is an arbitrary 20 byte string.
///
/// Guidelines for choosing a peer ID: http://bittorrent.org/beps/bep_0020.html.
pub type PeerId = [u8; 20];

/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// The maximum block size we will ever request from a peer (except possibly
/// the last block of a piece). This is the widely used and accepted value of
/// 16 KiB.
pub const MAX_BLOCK_SIZE: u32 = 0x4000;

/// The maximum number of pipelined block requests a session keeps
/// outstanding, per connection, at any given time.
pub const MAX_BACKLOG: usize = 5;

/// Returns the size of the next block to request, given how much of the
/// piece has already been requested.
///
/// The result is `max_block_size` (ordinarily [`MAX_BLOCK_SIZE`], but
/// callers thread through `SessionConf::max_block_size` so the value is
/// actually tunable) unless fewer than that many bytes remain in the piece,
/// in which case the remainder is returned.
pub(crate) fn next_block_len(piece_len: u32, requested: u32, max_block_size: u32) -> u32 {
    debug_assert!(requested < piece_len);
    std::cmp::min(max_block_size, piece_len - requested)
}

/// The bitfield represents the piece availability of a peer.
///
/// It is a compact bool vector from most significant to least significant
/// bits, that is, where the first highest bit represents the first piece,
/// the second highest element the second piece, and so on (e.g.
/// `0b1100_0001` would mean that the peer has pieces 0, 1, and 7). A truthy
/// boolean value at a piece's position means the peer has the piece, a falsy
/// value means it doesn't.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitfield(BitVec<Msb0, u8>);

impl Bitfield {
    /// Creates a bitfield with `piece_count` bits, all initialized to false.
    pub fn new(piece_count: usize) -> Self {
        let byte_len = (piece_count + 7) / 8;
        let mut bits: BitVec<Msb0, u8> = BitVec::from_vec(vec![0u8; byte_len]);
        bits.truncate(piece_count);
        Self(bits)
    }

    /// Parses a bitfield from its packed, MSB-first wire representation.
    ///
    /// The raw bytes may carry more bits than there are pieces (when
    /// `piece_count` is not a multiple of 8); trailing bits beyond
    /// `piece_count` are dropped, matching producer convention that they're
    /// always zero anyway.
    pub fn from_wire_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let mut bits: BitVec<Msb0, u8> = BitVec::from_slice(bytes);
        bits.truncate(piece_count);
        Self(bits)
    }

    /// Packs the bitfield into its MSB-first wire representation.
    pub fn into_wire_bytes(self) -> Vec<u8> {
        self.0.into_vec()
    }

    /// Returns whether the peer claims to have piece `index`.
    pub fn has(&self, index: PieceIndex) -> bool {
        self.0.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Marks piece `index` as held.
    ///
    /// Grows the underlying bit vector if `index` is past its current end.
    /// This can happen if a `Have` message announces a piece beyond the
    /// length of the bitfield we originally received from a non-conformant
    /// peer; we shouldn't panic on that.
    pub fn set(&mut self, index: PieceIndex) {
        if index >= self.0.len() {
            self.0.resize(index + 1, false);
        }
        self.0.set(index, true);
    }

    /// Returns the number of bits (pieces) the bitfield tracks.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_wire_round_trip() {
        // 0xC0 = 0b1100_0000: pieces 0 and 1 set, piece_count truncates the
        // rest of the byte away.
        let bf = Bitfield::from_wire_bytes(&[0xC0], 2);
        assert!(bf.has(0));
        assert!(bf.has(1));
        assert_eq!(bf.len(), 2);
    }

    #[test]
    fn test_bitfield_set_and_has() {
        let mut bf = Bitfield::new(4);
        assert!(!bf.has(2));
        bf.set(2);
        assert!(bf.has(2));
        assert!(!bf.has(0));
        assert!(!bf.has(1));
        assert!(!bf.has(3));
    }

    #[test]
    fn test_bitfield_has_out_of_range_is_false() {
        let bf = Bitfield::new(2);
        assert!(!bf.has(10));
    }

    #[test]
    fn test_bitfield_set_grows_past_original_len() {
        let mut bf = Bitfield::new(2);
        bf.set(5);
        assert!(bf.has(5));
        assert_eq!(bf.len(), 6);
    }

    #[test]
    fn test_next_block_len() {
        assert_eq!(next_block_len(32768, 0, MAX_BLOCK_SIZE), MAX_BLOCK_SIZE);
        assert_eq!(
            next_block_len(32768, MAX_BLOCK_SIZE, MAX_BLOCK_SIZE),
            MAX_BLOCK_SIZE
        );
        assert_eq!(next_block_len(20000, 16384, MAX_BLOCK_SIZE), 20000 - 16384);
    }

    #[test]
    fn test_next_block_len_honors_a_smaller_configured_max() {
        assert_eq!(next_block_len(10_000, 0, 4096), 4096);
        assert_eq!(next_block_len(10_000, 8192, 4096), 10_000 - 8192);
    }
}
