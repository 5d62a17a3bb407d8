//! Peer session (§4.D): per-connection state machine that dials one peer,
//! runs the handshake, reads its initial bitfield, and then repeatedly
//! pulls pieces from the shared work queue, pipelining block requests for
//! each.

pub mod codec;

use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use codec::{exchange_handshake, parse_piece, read_message, write_message, Handshake, Message};

use crate::conf::Conf;
use crate::coordinator::WorkQueue;
use crate::error::{Error, Result};
use crate::peers::PeerAddr;
use crate::torrent::{PieceResult, PieceWork, TorrentInfo};
use crate::{next_block_len, Bitfield};

/// The connection-level states named in §4.D:
/// `Dialing → Handshaking → AwaitingBitfield → Ready → Working ⇄ Reading →
/// (Terminated | Ready)`. Only `Ready`/`Working` accept new work items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Dialing,
    Handshaking,
    AwaitingBitfield,
    Ready,
    Working,
    Reading,
    Terminated,
}

/// Runs one peer session to completion.
///
/// Every error a session can produce is a *transient session error* in the
/// taxonomy of §7: it is logged here and swallowed rather than propagated,
/// since nothing outside this session is allowed to fail because of it. Any
/// work item the session was holding when it failed has already been
/// re-queued by the time this returns.
pub(crate) async fn run(
    addr: PeerAddr,
    torrent: Arc<TorrentInfo>,
    conf: Conf,
    queue: Arc<WorkQueue>,
    results: mpsc::Sender<PieceResult>,
) {
    if let Err(e) = try_run(addr, &torrent, &conf, &queue, &results).await {
        log::warn!("peer {}: session ended: {}", addr, e);
    }
}

async fn try_run(
    addr: PeerAddr,
    torrent: &Arc<TorrentInfo>,
    conf: &Conf,
    queue: &Arc<WorkQueue>,
    results: &mpsc::Sender<PieceResult>,
) -> Result<()> {
    let state = State::Dialing;
    log::debug!("peer {}: {:?}", addr, state);
    let mut stream =
        timeout(conf.session.dial_timeout, TcpStream::connect(addr.socket_addr())).await??;

    run_on_stream(&mut stream, addr, torrent, conf, queue, results).await
}

/// The handshake/bitfield/work-loop core of a session, generic over the
/// transport so it can be driven over an in-memory duplex stream in tests
/// without a real TCP connection.
async fn run_on_stream<S>(
    stream: &mut S,
    addr: PeerAddr,
    torrent: &Arc<TorrentInfo>,
    conf: &Conf,
    queue: &Arc<WorkQueue>,
    results: &mpsc::Sender<PieceResult>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = State::Handshaking;
    log::debug!("peer {}: {:?}", addr, state);
    let local_handshake = Handshake::new(torrent.info_hash, torrent.peer_id);
    let peer_handshake = timeout(
        conf.session.handshake_timeout,
        exchange_handshake(stream, local_handshake),
    )
    .await
    .map_err(|_| Error::HandshakeTimeout)??;
    if peer_handshake.info_hash != torrent.info_hash {
        log::warn!("peer {}: info hash mismatch", addr);
        return Err(Error::InfoHashMismatch);
    }

    state = State::AwaitingBitfield;
    log::debug!("peer {}: {:?}", addr, state);
    let msg = timeout(conf.session.bitfield_timeout, read_message(stream))
        .await
        .map_err(|_| Error::ExpectedBitfield)??;
    let bitfield_bytes = match msg {
        Message::Bitfield(bytes) => bytes,
        _ => {
            log::warn!("peer {}: first message after handshake wasn't a bitfield", addr);
            return Err(Error::ExpectedBitfield);
        }
    };
    let mut peer_bitfield = Bitfield::from_wire_bytes(&bitfield_bytes, torrent.piece_count());

    state = State::Ready;
    log::debug!("peer {}: {:?}", addr, state);
    // The client never chokes the peer back (leech-only); write failures on
    // this handshake tail are session-fatal, per §9's open question.
    write_message(stream, &Message::Unchoke).await?;
    write_message(stream, &Message::Interested).await?;

    let mut choked = true;
    loop {
        state = State::Working;
        let work = match queue.pop().await {
            Some(work) => work,
            None => {
                state = State::Terminated;
                log::debug!("peer {}: {:?} (work queue closed)", addr, state);
                return Ok(());
            }
        };

        if !peer_bitfield.has(work.index) {
            queue.push(work);
            continue;
        }

        let index = work.index;
        match download_piece(stream, &work, &mut peer_bitfield, &mut choked, conf, &mut state).await
        {
            Ok(bytes) => {
                if Sha1::digest(&bytes).as_slice() == &work.expected_hash[..] {
                    // Deliver the verified piece first: it's the valuable
                    // output. A peer that sends every block and then closes
                    // the socket makes the following `Have` write fail, and
                    // that must not cost us a piece we've already verified.
                    if results.send(PieceResult { index, bytes }).await.is_err() {
                        // The coordinator has already finished and dropped
                        // its receiver; nothing left for this session to do.
                        return Ok(());
                    }
                    write_message(stream, &Message::have(index)).await?;
                } else {
                    log::warn!("peer {}: integrity check failed for piece {}", addr, index);
                    queue.push(work);
                }
            }
            Err(e) => {
                queue.push(work);
                return Err(e);
            }
        }
    }
}

/// Downloads one piece on this connection, subject to the 30-second
/// per-piece deadline (§4.D).
async fn download_piece<S>(
    stream: &mut S,
    work: &PieceWork,
    peer_bitfield: &mut Bitfield,
    choked: &mut bool,
    conf: &Conf,
    state: &mut State,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(
        conf.session.piece_timeout,
        download_piece_inner(stream, work, peer_bitfield, choked, conf, state),
    )
    .await
    .map_err(|_| Error::PieceTimeout)?
}

async fn download_piece_inner<S>(
    stream: &mut S,
    work: &PieceWork,
    peer_bitfield: &mut Bitfield,
    choked: &mut bool,
    conf: &Conf,
    state: &mut State,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let length = work.length;
    let mut buffer = vec![0u8; length as usize];
    let mut downloaded: u32 = 0;
    let mut requested: u32 = 0;
    let mut backlog: usize = 0;

    while downloaded < length {
        *state = State::Working;
        if !*choked {
            while backlog < conf.session.max_backlog && requested < length {
                let block_len = next_block_len(length, requested, conf.session.max_block_size);
                write_message(stream, &Message::request(work.index, requested, block_len)).await?;
                requested += block_len;
                backlog += 1;
            }
        }

        *state = State::Reading;
        let msg = read_message(stream).await?;
        match msg {
            Message::Unchoke => *choked = false,
            Message::Choke => *choked = true,
            Message::Have(i) => peer_bitfield.set(i),
            Message::Piece { .. } => {
                let n = parse_piece(work.index, &mut buffer, &msg)?;
                downloaded += n as u32;
                backlog = backlog.saturating_sub(1);
            }
            // Bitfield, Interested, NotInterested, Cancel, Request,
            // keep-alive, and any message this leech can't produce a
            // meaningful response to: dropped, per §4.D.
            _ => {}
        }
    }

    Ok(buffer)
}
