//! Dual-socket transport to the audio engine.
//!
//! The engine listens on two consecutive TCP ports: the write port carries
//! strictly serialized request/response pairs, the read port streams
//! unsolicited events. Both directions are NUL-framed text.
//!
//! Architecture follows the reactor pattern: each socket is owned by a
//! dedicated task. Requests flow through an mpsc channel and are answered
//! over per-request oneshot channels, so callers just `await` a reply.
//! Responses are matched to requests by order, never by id — the writer
//! task keeps exactly one request in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::command::{parse_response, EngineCommand, ProtocolError, Resp};
use crate::event::EngineEvent;

/// Queue depth for outbound requests; overflow applies backpressure.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Buffer depth for inbound events before the session falls behind.
const EVENT_QUEUE_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("engine connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine link is closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Something the session must react to besides command replies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Unsolicited event from the read channel.
    Event(EngineEvent),
    /// Write socket died mid-session: queue abandoned, link crashed.
    WriteClosed,
    /// Read socket died; no more events will arrive.
    ReadClosed,
}

struct WriteRequest {
    line: String,
    cmd: EngineCommand,
    reply: oneshot::Sender<Result<Resp, LinkError>>,
}

/// Handle to a connected engine. Cheap to clone.
#[derive(Clone)]
pub struct EngineLink {
    tx: mpsc::Sender<WriteRequest>,
    crashed: Arc<AtomicBool>,
}

impl EngineLink {
    /// Connect both channels: the write socket at `addr`, the read socket at
    /// `addr` with the port incremented by one.
    pub async fn connect(
        addr: (std::net::IpAddr, u16),
    ) -> Result<(Self, ReceiverStream<LinkEvent>), LinkError> {
        let (host, port) = addr;
        Self::connect_pair((host, port), (host, port + 1)).await
    }

    /// Connect with explicit write and read addresses (used by tests).
    pub async fn connect_pair(
        write_addr: (std::net::IpAddr, u16),
        read_addr: (std::net::IpAddr, u16),
    ) -> Result<(Self, ReceiverStream<LinkEvent>), LinkError> {
        let write_sock = TcpStream::connect(write_addr).await?;
        write_sock.set_nodelay(true)?;
        let read_sock = TcpStream::connect(read_addr).await?;
        read_sock.set_nodelay(true)?;

        info!(?write_addr, ?read_addr, "engine link connected");

        let crashed = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let (write_read_half, write_half) = write_sock.into_split();
        tokio::spawn(writer_task(
            write_half,
            write_read_half,
            cmd_rx,
            event_tx.clone(),
            Arc::clone(&crashed),
        ));

        let (read_half, _) = read_sock.into_split();
        tokio::spawn(reader_task(read_half, event_tx));

        Ok((Self { tx: cmd_tx, crashed }, ReceiverStream::new(event_rx)))
    }

    /// Whether the write socket has been lost.
    pub fn crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its (order-matched) reply.
    pub async fn send(&self, cmd: EngineCommand) -> Result<Resp, LinkError> {
        if self.crashed() {
            return Err(LinkError::Closed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WriteRequest {
            line: cmd.to_string(),
            cmd,
            reply: reply_tx,
        };

        self.tx.send(request).await.map_err(|_| LinkError::Closed)?;
        reply_rx.await.map_err(|_| LinkError::Closed)?
    }
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    read_half: OwnedReadHalf,
    mut cmd_rx: mpsc::Receiver<WriteRequest>,
    event_tx: mpsc::Sender<LinkEvent>,
    crashed: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    while let Some(request) = cmd_rx.recv().await {
        debug!(cmd = %request.line, "engine <- ");

        let mut framed = request.line.clone().into_bytes();
        framed.push(0);

        if let Err(err) = write_half.write_all(&framed).await {
            warn!(%err, "engine write socket lost");
            let _ = request.reply.send(Err(LinkError::Closed));
            fail_queue(&mut cmd_rx, &event_tx, &crashed).await;
            return;
        }

        buf.clear();
        let reply = match reader.read_until(0, &mut buf).await {
            Ok(0) => Err(()),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(%err, "engine response read failed");
                Err(())
            }
        };

        if reply.is_err() {
            let _ = request.reply.send(Err(LinkError::Closed));
            fail_queue(&mut cmd_rx, &event_tx, &crashed).await;
            return;
        }

        let raw = String::from_utf8_lossy(strip_nul(&buf)).into_owned();
        debug!(resp = %raw, "engine -> ");

        let parsed = parse_response(&raw, request.cmd.response_kind()).map_err(LinkError::from);
        let _ = request.reply.send(parsed);
    }
}

/// Abandon every queued request and announce the crash exactly once.
async fn fail_queue(
    cmd_rx: &mut mpsc::Receiver<WriteRequest>,
    event_tx: &mpsc::Sender<LinkEvent>,
    crashed: &AtomicBool,
) {
    crashed.store(true, Ordering::SeqCst);
    cmd_rx.close();
    while let Some(pending) = cmd_rx.recv().await {
        let _ = pending.reply.send(Err(LinkError::Closed));
    }
    let _ = event_tx.send(LinkEvent::WriteClosed).await;
}

async fn reader_task(read_half: OwnedReadHalf, event_tx: mpsc::Sender<LinkEvent>) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(0, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "engine event read failed");
                break;
            }
        }

        let line = String::from_utf8_lossy(strip_nul(&buf)).into_owned();
        match line.parse::<EngineEvent>() {
            Ok(event) => {
                if event_tx.send(LinkEvent::Event(event)).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(%err, raw = %line, "dropping unparseable engine event"),
        }
    }

    let _ = event_tx.send(LinkEvent::ReadClosed).await;
}

fn strip_nul(buf: &[u8]) -> &[u8] {
    match buf.last() {
        Some(0) => &buf[..buf.len() - 1],
        _ => buf,
    }
}
