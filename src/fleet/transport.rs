//! Point-to-point mailboxes over framed TCP.
//!
//! The master binds a listener and waits until every other node has dialed
//! in and introduced itself with a rank handshake; workers and the timer
//! hold a single link to the master. Each link is served by one reader and
//! one writer task over [`FrameCodec`]-framed stream halves, so delivery
//! per directed pair is strictly FIFO while no cross-pair ordering is ever
//! assumed.
//!
//! [`Mailbox`] is the only surface the coordinator and drivers see. The
//! in-memory [`local_fleet`] constructor produces mailboxes with the
//! identical contract for tests.

use super::protocol::Message;
use super::types::{FleetLayout, Rank, MASTER_RANK};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Upper bound on a frame body; prefixes are tiny, so anything near this
/// is a corrupted stream.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Dial retry schedule while the master's listener comes up.
const CONNECT_ATTEMPTS: usize = 40;
const CONNECT_BASE_DELAY_MS: u64 = 150;
const CONNECT_MAX_DELAY_MS: u64 = 1_200;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("fleet link closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Length-delimited frame codec: a big-endian `u32` length prefix over
/// an opaque body.
///
/// Wire format:
/// - body_len: u32 (big-endian)
/// - body: `body_len` bytes (a message frame or the handshake blob)
///
/// Zero-length and oversized frames are protocol errors, never silently
/// passed through.
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> FrameCodec {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the length prefix first.
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at the body length without consuming.
        let body_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if body_len == 0 || body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} out of range", body_len),
            ));
        }

        // Wait for the full frame before consuming anything.
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        Ok(Some(src.split_to(body_len)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if body.is_empty() || body.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame length {} out of range", body.len()),
            ));
        }
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

type LinkReader = FramedRead<OwnedReadHalf, FrameCodec>;
type LinkWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Rank introduction sent as the first frame on a fresh link.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    rank: u32,
}

/// One node's view of the fleet: an ordered inbox merging all peers, and
/// an outgoing FIFO lane per peer.
pub struct Mailbox {
    local: Rank,
    incoming: mpsc::UnboundedReceiver<(Rank, Message)>,
    peers: BTreeMap<Rank, mpsc::UnboundedSender<(Rank, Message)>>,
}

impl Mailbox {
    pub fn local_rank(&self) -> Rank {
        self.local
    }

    /// Queues a message to a peer. Delivery is FIFO per directed pair.
    pub fn send(&self, to: Rank, msg: Message) -> Result<(), TransportError> {
        let lane = self
            .peers
            .get(&to)
            .ok_or_else(|| TransportError::Handshake(format!("no link to rank {}", to)))?;
        lane.send((self.local, msg))
            .map_err(|_| TransportError::Closed)
    }

    /// Blocks until the next message arrives from any peer.
    pub async fn recv(&mut self) -> Result<(Rank, Message), TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    /// Non-blocking probe of the inbox.
    pub fn try_recv(&mut self) -> Result<Option<(Rank, Message)>, TransportError> {
        match self.incoming.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Drops every outgoing lane, letting peers observe EOF. Used on
    /// fleet abort where no acknowledgement is collected.
    pub fn shutdown(&mut self) {
        self.peers.clear();
    }
}

/// Spawns the reader and writer tasks serving one established link.
fn serve_link(
    mut reader: LinkReader,
    mut writer: LinkWriter,
    peer: Rank,
    inbox: mpsc::UnboundedSender<(Rank, Message)>,
) -> mpsc::UnboundedSender<(Rank, Message)> {
    let (lane_tx, mut lane_rx) = mpsc::unbounded_channel::<(Rank, Message)>();
    tokio::spawn(async move {
        while let Some((_, msg)) = lane_rx.recv().await {
            if let Err(e) = writer.send(Bytes::from(msg.encode())).await {
                tracing::debug!("link to rank {} closed while writing: {}", peer, e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(body) => match Message::decode(&body) {
                    Ok(msg) => {
                        if inbox.send((peer, msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("undecodable frame from rank {}: {}", peer, e);
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!("link from rank {} failed: {}", peer, e);
                    break;
                }
            }
        }
        tracing::debug!("link from rank {} reached EOF", peer);
    });

    lane_tx
}

/// Binds the master's listener and accepts the whole fleet: one handshake
/// per non-master rank, rejecting duplicates and out-of-range ranks.
pub async fn serve_master(
    addr: SocketAddr,
    layout: FleetLayout,
) -> Result<Mailbox, TransportError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("master listening on {}", listener.local_addr()?);

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let mut peers = BTreeMap::new();

    while peers.len() < layout.size() - 1 {
        let (stream, remote) = listener.accept().await?;
        let (rd, wr) = stream.into_split();
        let mut reader = FramedRead::new(rd, FrameCodec::new());
        let writer = FramedWrite::new(wr, FrameCodec::new());

        let hello = reader
            .next()
            .await
            .ok_or(TransportError::Closed)?
            .map_err(TransportError::Io)?;
        let hello: Hello = bincode::deserialize(&hello)
            .map_err(|e| TransportError::Handshake(format!("bad hello from {}: {}", remote, e)))?;
        let rank = Rank(hello.rank);

        if rank == MASTER_RANK || !layout.contains(rank) {
            return Err(TransportError::Handshake(format!(
                "peer {} announced invalid rank {}",
                remote, rank
            )));
        }
        if peers.contains_key(&rank) {
            return Err(TransportError::Handshake(format!(
                "duplicate handshake for rank {}",
                rank
            )));
        }

        tracing::debug!("rank {} joined from {}", rank, remote);
        peers.insert(rank, serve_link(reader, writer, rank, inbox_tx.clone()));
    }

    tracing::info!("fleet of {} nodes assembled", layout.size());
    Ok(Mailbox {
        local: MASTER_RANK,
        incoming: inbox_rx,
        peers,
    })
}

/// Dials the master and performs the rank handshake, retrying with
/// backoff while the listener comes up.
pub async fn connect(addr: SocketAddr, local: Rank) -> Result<Mailbox, TransportError> {
    let mut delay_ms = CONNECT_BASE_DELAY_MS;
    let mut stream = None;
    for attempt in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => {
                if attempt + 1 == CONNECT_ATTEMPTS {
                    return Err(e.into());
                }
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(CONNECT_MAX_DELAY_MS);
            }
        }
    }
    let stream = stream.ok_or(TransportError::Closed)?;
    let (rd, wr) = stream.into_split();
    let reader = FramedRead::new(rd, FrameCodec::new());
    let mut writer = FramedWrite::new(wr, FrameCodec::new());

    let hello = bincode::serialize(&Hello { rank: local.0 })
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    writer.send(Bytes::from(hello)).await?;

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let mut peers = BTreeMap::new();
    peers.insert(MASTER_RANK, serve_link(reader, writer, MASTER_RANK, inbox_tx));

    Ok(Mailbox {
        local,
        incoming: inbox_rx,
        peers,
    })
}

/// Builds an in-memory fleet with the hub topology of the real one: the
/// master holds a lane to every peer, each peer a lane to the master.
/// Returned mailboxes are indexed by rank. Test-oriented, but kept in the
/// library so drivers can be exercised without sockets.
pub fn local_fleet(size: usize) -> Vec<Mailbox> {
    let channels: Vec<_> = (0..size).map(|_| mpsc::unbounded_channel()).collect();
    let mut senders = Vec::with_capacity(size);
    let mut receivers = Vec::with_capacity(size);
    for (tx, rx) in channels {
        senders.push(tx);
        receivers.push(rx);
    }

    receivers
        .into_iter()
        .enumerate()
        .map(|(i, incoming)| {
            let local = Rank(i as u32);
            let mut peers = BTreeMap::new();
            if local == MASTER_RANK {
                for (j, tx) in senders.iter().enumerate().skip(1) {
                    peers.insert(Rank(j as u32), tx.clone());
                }
            } else {
                peers.insert(MASTER_RANK, senders[0].clone());
            }
            Mailbox {
                local,
                incoming,
                peers,
            }
        })
        .collect()
}
