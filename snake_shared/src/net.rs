//! Framed transport.
//!
//! The sync core only needs two operations from a connection: send one opaque
//! frame, and take the next complete frame if one has arrived. Both TCP and
//! in-process connections implement [`FramedTransport`].
//!
//! TCP frames are a 4-byte big-endian length followed by the payload. Each
//! [`FramedConn`] owns a reader task that decodes frames into a channel, so
//! [`FramedTransport::try_recv_frame`] never blocks; an empty channel is the
//! normal "nothing this tick" outcome.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::debug;

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A reliable, ordered, message-framed connection.
#[async_trait]
pub trait FramedTransport: Send {
    /// Sends one frame.
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()>;

    /// Returns the next complete frame, `Ok(None)` if none is ready, or an
    /// error once the connection is gone.
    fn try_recv_frame(&mut self) -> anyhow::Result<Option<Bytes>>;

    /// Human-readable peer description for logs.
    fn label(&self) -> String;
}

#[async_trait]
impl<T: FramedTransport + ?Sized> FramedTransport for Box<T> {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        (**self).send_frame(frame).await
    }

    fn try_recv_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        (**self).try_recv_frame()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    anyhow::ensure!(
        payload.len() <= MAX_FRAME_LEN,
        "frame too large: {} bytes",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Bytes> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(Bytes::from(payload))
}

/// TCP connection with a background frame reader.
#[derive(Debug)]
pub struct FramedConn {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<anyhow::Result<Bytes>>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
}

impl FramedConn {
    /// Wraps an accepted or connected stream. Must be called inside a tokio
    /// runtime.
    pub fn new(stream: TcpStream) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().context("peer_addr")?;
        stream.set_nodelay(true).context("set_nodelay")?;
        let (rd, writer) = stream.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(rd, tx, peer));
        Ok(Self {
            writer,
            inbound,
            reader,
            peer,
        })
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

async fn read_loop(
    mut rd: OwnedReadHalf,
    tx: mpsc::UnboundedSender<anyhow::Result<Bytes>>,
    peer: SocketAddr,
) {
    loop {
        match read_frame(&mut rd).await {
            Ok(frame) => {
                if tx.send(Ok(frame)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(%peer, error = %e, "Reader stopped");
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

impl Drop for FramedConn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl FramedTransport for FramedConn {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        write_frame(&mut self.writer, &frame).await
    }

    fn try_recv_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        match self.inbound.try_recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => anyhow::bail!("connection to {} closed", self.peer),
        }
    }

    fn label(&self) -> String {
        self.peer.to_string()
    }
}

/// In-process loopback connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    label: String,
}

impl MemoryTransport {
    /// Two connected ends. Each end is labelled with the name of its peer.
    pub fn pair(a: &str, b: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                label: b.to_string(),
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                label: a.to_string(),
            },
        )
    }
}

#[async_trait]
impl FramedTransport for MemoryTransport {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| anyhow::anyhow!("peer {} closed", self.label))
    }

    fn try_recv_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => anyhow::bail!("peer {} closed", self.label),
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}
