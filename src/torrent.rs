//! The torrent descriptor and the work/result types derived from it (§3).

use crate::error::{Error, Result};
use crate::peers::PeerAddr;
use crate::{PeerId, PieceIndex, Sha1Hash};

/// The static metadata of a torrent, handed to the coordinator by the
/// external metainfo/tracker subsystem. Immutable for the duration of a
/// download.
#[derive(Clone, Debug)]
pub struct TorrentInfo {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
    pub piece_hashes: Vec<Sha1Hash>,
    pub piece_length: u32,
    pub total_length: u64,
    pub peers: Vec<PeerAddr>,
}

impl TorrentInfo {
    /// Constructs a torrent descriptor, validating the invariant
    /// `ceil(total_length / piece_length) == len(piece_hashes)`.
    ///
    /// This is an input error (§7): it is checked before any connection is
    /// opened, and the core refuses to start if it doesn't hold.
    pub fn new(
        info_hash: Sha1Hash,
        peer_id: PeerId,
        piece_hashes: Vec<Sha1Hash>,
        piece_length: u32,
        total_length: u64,
        peers: Vec<PeerAddr>,
    ) -> Result<Self> {
        if piece_length == 0 || total_length == 0 || piece_hashes.is_empty() {
            return Err(Error::InvalidTorrentInfo);
        }
        let expected_piece_count =
            (total_length + piece_length as u64 - 1) / piece_length as u64;
        if expected_piece_count != piece_hashes.len() as u64 {
            return Err(Error::InvalidTorrentInfo);
        }
        Ok(Self {
            info_hash,
            peer_id,
            piece_hashes,
            piece_length,
            total_length,
            peers,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Returns the `[begin, end)` byte range of piece `index` within the
    /// assembled output buffer.
    pub fn piece_bounds(&self, index: PieceIndex) -> (u64, u64) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.total_length);
        (begin, end)
    }

    /// Piece length law (§8, invariant 5): `piece_length` for every piece
    /// except the last, which is `total_length - (num_pieces-1) *
    /// piece_length` and always falls in `(0, piece_length]`.
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }
}

/// A unit of work handed from the coordinator's work queue to a session: one
/// piece to download and verify.
#[derive(Clone, Debug)]
pub struct PieceWork {
    pub index: PieceIndex,
    pub expected_hash: Sha1Hash,
    pub length: u32,
}

/// A verified piece, ready to be copied into the output buffer.
///
/// Produced at most once per index across all sessions: it is only ever
/// constructed after the assembled bytes passed SHA-1 verification against
/// `expected_hash`.
#[derive(Debug)]
pub struct PieceResult {
    pub index: PieceIndex,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hashes(n: usize) -> Vec<Sha1Hash> {
        (0..n).map(|i| [i as u8; 20]).collect()
    }

    #[test]
    fn test_new_accepts_consistent_descriptor() {
        // S5 — total_length=100, piece_length=30 -> 4 pieces.
        let info = TorrentInfo::new(
            [0; 20],
            [1; 20],
            hashes(4),
            30,
            100,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(info.piece_count(), 4);
    }

    #[test]
    fn test_new_rejects_inconsistent_piece_count() {
        let err = TorrentInfo::new([0; 20], [1; 20], hashes(3), 30, 100, Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTorrentInfo));
    }

    #[test]
    fn test_new_rejects_zero_lengths() {
        assert!(TorrentInfo::new([0; 20], [1; 20], hashes(1), 0, 100, Vec::new())
            .is_err());
        assert!(TorrentInfo::new([0; 20], [1; 20], hashes(1), 30, 0, Vec::new())
            .is_err());
    }

    // S5 — last piece sizing: total=100, piece_length=30 -> [30,30,30,10].
    #[test]
    fn test_piece_size_law() {
        let info = TorrentInfo::new([0; 20], [1; 20], hashes(4), 30, 100, Vec::new())
            .unwrap();
        assert_eq!(info.piece_size(0), 30);
        assert_eq!(info.piece_size(1), 30);
        assert_eq!(info.piece_size(2), 30);
        assert_eq!(info.piece_size(3), 10);
    }

    #[test]
    fn test_piece_size_exact_multiple() {
        // total_length an exact multiple of piece_length: last piece equals
        // the nominal piece length too.
        let info = TorrentInfo::new([0; 20], [1; 20], hashes(2), 50, 100, Vec::new())
            .unwrap();
        assert_eq!(info.piece_size(0), 50);
        assert_eq!(info.piece_size(1), 50);
    }

    #[test]
    fn test_piece_bounds() {
        let info = TorrentInfo::new([0; 20], [1; 20], hashes(4), 30, 100, Vec::new())
            .unwrap();
        assert_eq!(info.piece_bounds(0), (0, 30));
        assert_eq!(info.piece_bounds(3), (90, 100));
    }
}
