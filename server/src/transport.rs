//! Outbound side of a connection
//!
//! Sessions write through the [`Transport`] trait and never block on the
//! network: a write only queues the packet, and the returned [`PendingWrite`]
//! lets the caller ask for the connection to close once that packet is on the
//! wire.
//!
//! [`TcpTransport`] backs the trait with a writer task per connection. The
//! task consumes an ordered channel, so a close queued after a packet is
//! carried out only after the packet has been flushed.

use log::{debug, error};
use shared::{check_frame_len, decode_body, encode_frame, FrameError, Packet, FRAME_HEADER_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

/// Completion handle for a queued write.
pub trait PendingWrite: Send {
    /// Closes the connection after the write this handle belongs to has been
    /// delivered.
    fn close_on_complete(self: Box<Self>);
}

pub trait Transport: Send {
    /// Queues `packet` for delivery. Never waits for the network.
    fn write(&mut self, packet: Packet) -> Box<dyn PendingWrite>;

    /// Closes the connection without sending anything further.
    fn close(&mut self);

    fn remote_address(&self) -> Option<SocketAddr>;
}

/// Work items for a connection's writer task
#[derive(Debug)]
enum Outbound {
    Packet(Packet),
    Close,
}

pub struct TcpTransport {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TcpTransport {
    /// Spawns the writer task for `writer`.
    ///
    /// `closed` fires once the writer has shut down, whatever the cause, so
    /// the connection's reader can stop as well.
    pub fn spawn<W>(writer: W, addr: SocketAddr, closed: oneshot::Sender<()>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, addr, rx, closed));
        Self { addr, tx }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, packet: Packet) -> Box<dyn PendingWrite> {
        if self.tx.send(Outbound::Packet(packet)).is_err() {
            debug!("Dropping packet for {}: writer already closed", self.addr);
        }
        Box::new(TcpPendingWrite {
            tx: self.tx.clone(),
        })
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Close);
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }
}

struct TcpPendingWrite {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PendingWrite for TcpPendingWrite {
    fn close_on_complete(self: Box<Self>) {
        // Channel order puts the close behind the packet that produced this handle.
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn write_loop<W>(
    mut writer: W,
    addr: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed: oneshot::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Packet(packet) => {
                if let Err(e) = write_frame(&mut writer, &packet).await {
                    error!("Failed to write to {}: {}", addr, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of {} failed: {}", addr, e);
    }
    let _ = closed.send(());
}

pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed packet. Returns `Ok(None)` on a clean EOF at a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Packet>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside a frame header",
                )
                .into())
            }
            n => filled += n,
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    check_frame_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode_body(&body).map(Some)
}
