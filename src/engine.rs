//! The crate's public entry point: runs a torrent download to completion
//! given a torrent descriptor and configuration (§4.E).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::conf::Conf;
use crate::coordinator::{self, DownloadProgress};
use crate::error::Result;
use crate::torrent::TorrentInfo;

/// Downloads every piece of `torrent` from its candidate peers and returns
/// the fully assembled file.
///
/// This runs the coordinator's algorithm (§4.E) end to end: it seeds the
/// work queue, spawns one session per peer, and assembles verified pieces
/// into the output buffer until every piece has arrived, or the download
/// can no longer make progress (in which case it returns
/// [`Error::NoProgress`](crate::Error::NoProgress)).
///
/// `torrent` must already satisfy the piece-count invariant of §3; it is
/// only constructible that way via [`TorrentInfo::new`].
pub async fn download(torrent: TorrentInfo, conf: Conf) -> Result<Vec<u8>> {
    download_with_progress(torrent, conf, None).await
}

/// Same as [`download`], but additionally reports a [`DownloadProgress`]
/// event on `progress_tx` once per verified piece (§6 "Observability").
///
/// Progress reporting is best-effort: a full or dropped receiver never
/// stalls or fails the download.
pub async fn download_with_progress(
    torrent: TorrentInfo,
    conf: Conf,
    progress_tx: Option<mpsc::Sender<DownloadProgress>>,
) -> Result<Vec<u8>> {
    coordinator::run(Arc::new(torrent), conf, progress_tx).await
}
