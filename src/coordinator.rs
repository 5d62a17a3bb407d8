//! Download coordinator (§4.E): distributes pieces across peer sessions via
//! a shared work queue and collects verified results into the output
//! buffer.
//!
//! The work queue is the hazard §9 calls out by name: a single channel used
//! both to hand out work and to receive it back on failure is unsound once
//! the channel is closed out from under a still-running session. Rather
//! than build on an `mpsc` for this, the queue here is a plain
//! mutex-guarded deque with a `closed` flag and a [`tokio::sync::Notify`]
//! to wake waiters — re-queue attempts after closure are simply discarded,
//! which is the "idempotent late return" §9 asks for.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

use crate::conf::Conf;
use crate::error::{Error, Result};
use crate::torrent::{PieceResult, PieceWork, TorrentInfo};
use crate::PieceIndex;

/// The number of in-flight results the coordinator is willing to buffer
/// before a session's send blocks. Small and bounded per §4.E step 2; the
/// coordinator drains it promptly so this is not a throughput limit.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// A progress event emitted once per verified piece (§6 "Observability").
///
/// Exact delivery is best-effort: if nothing is listening, the event is
/// simply dropped, which never affects the download itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    pub pieces_completed: usize,
    pub pieces_total: usize,
    pub last_index: PieceIndex,
    pub active_sessions: usize,
}

/// The shared, multi-producer multi-consumer work queue described in §5:
/// sessions take work items from it and may put them back on failure.
pub(crate) struct WorkQueue {
    items: Mutex<VecDeque<PieceWork>>,
    notify: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    pub(crate) fn new(items: impl IntoIterator<Item = PieceWork>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Re-queues a work item a session failed to complete.
    ///
    /// Silently discarded once the queue is closed, per §5: "re-queue
    /// attempts after close must either be discarded silently or return a
    /// non-fatal error that the session treats as end-of-work." A session
    /// never sees this as an error; its next `pop` simply returns `None`.
    pub(crate) fn push(&self, work: PieceWork) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.items.lock().unwrap().push_back(work);
        self.notify.notify_one();
    }

    /// Takes the next work item, waiting if the queue is momentarily empty.
    /// Returns `None` once the queue has been closed and fully drained.
    pub(crate) async fn pop(&self) -> Option<PieceWork> {
        loop {
            // Registered before the emptiness/closed check so that a push()
            // or close() racing with this call is never missed: Notify
            // captures notifications issued after the `Notified` future is
            // created even if it hasn't been polled yet.
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().unwrap().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Closes the queue, waking every session still waiting on `pop`.
    /// Subsequent `push`es are discarded.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Runs a torrent download to completion (§4.E's numbered algorithm) and
/// returns the fully assembled output buffer.
pub(crate) async fn run(
    torrent: Arc<TorrentInfo>,
    conf: Conf,
    progress_tx: Option<mpsc::Sender<DownloadProgress>>,
) -> Result<Vec<u8>> {
    let num_pieces = torrent.piece_count();
    log::info!(
        "starting download of {} ({} pieces, {} candidate peers)",
        hex::encode(torrent.info_hash),
        num_pieces,
        torrent.peers.len(),
    );

    // Step 1: seed the work queue with one item per piece, in index order.
    let work_items = (0..num_pieces).map(|index| PieceWork {
        index,
        expected_hash: torrent.piece_hashes[index],
        length: torrent.piece_size(index),
    });
    let queue = Arc::new(WorkQueue::new(work_items));

    // Step 2: a small-bounded result channel the coordinator drains
    // promptly.
    let (result_tx, mut result_rx) = mpsc::channel::<PieceResult>(RESULT_CHANNEL_CAPACITY);

    let active_sessions = Arc::new(AtomicUsize::new(torrent.peers.len()));

    // Step 3: spawn one session per peer.
    for addr in torrent.peers.iter().copied() {
        let torrent = Arc::clone(&torrent);
        let conf = conf.clone();
        let queue = Arc::clone(&queue);
        let result_tx = result_tx.clone();
        let active_sessions = Arc::clone(&active_sessions);
        tokio::spawn(async move {
            crate::peer::run(addr, torrent, conf, queue, result_tx).await;
            active_sessions.fetch_sub(1, Ordering::AcqRel);
        });
    }
    // Drop our own sender so the channel closes once every spawned session
    // has dropped its clone, letting `recv` observe total liveness loss.
    drop(result_tx);

    // Step 4: the output buffer, written only by this task, one disjoint
    // range per verified piece.
    let mut output = vec![0u8; torrent.total_length as usize];
    let mut pieces_completed = 0usize;

    // Step 5: drain the result channel until every piece has arrived.
    while pieces_completed < num_pieces {
        let result = match result_rx.recv().await {
            Some(result) => result,
            None => {
                // Every sender was dropped, i.e. every session has
                // terminated, and we still don't have all the pieces: no
                // live producer remains and we'd otherwise hang forever.
                return Err(Error::NoProgress);
            }
        };

        let (begin, end) = torrent.piece_bounds(result.index);
        output[begin as usize..end as usize].copy_from_slice(&result.bytes);
        pieces_completed += 1;

        let progress = DownloadProgress {
            pieces_completed,
            pieces_total: num_pieces,
            last_index: result.index,
            active_sessions: active_sessions.load(Ordering::Acquire),
        };
        log::info!(
            "piece {} verified ({}/{} pieces, {} active sessions)",
            progress.last_index,
            progress.pieces_completed,
            progress.pieces_total,
            progress.active_sessions,
        );
        if let Some(tx) = &progress_tx {
            // Progress observation is best-effort: a full or dropped
            // receiver must never stall or fail the download.
            let _ = tx.try_send(progress);
        }
    }

    // Step 6: signal remaining sessions to exit and hand back the result.
    queue.close();
    Ok(output)
}
