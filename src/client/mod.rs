use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::TcpKeepalive;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::protocol::{self, Frame, FrameDecoder, WireError};

/// One persistent session. Many workers may land on the same client through
/// the pool's round-robin, so the write half sits behind a mutex; replies are
/// decoded by a background read task and delivered out of band.
pub struct Client {
    index: usize,
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
}

impl Client {
    /// Establish the session eagerly. The returned channel carries every
    /// reply this connection will ever see; it is sized so the read task
    /// never blocks on a slow consumer.
    pub async fn connect(
        index: usize,
        addr: SocketAddr,
        reply_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<Frame>)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {}", addr))?;
        tune_socket(&stream)?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(reply_buffer.max(1));
        tokio::spawn(read_loop(index, read_half, tx));

        debug!("connection {} established to {}", index, addr);
        Ok((
            Self {
                index,
                peer: addr,
                writer: Mutex::new(write_half),
                next_id: AtomicU64::new(0),
            },
            rx,
        ))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Correlation ids are 1-based and strictly increasing per connection.
    pub fn reserve_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write one framed request. Returns as soon as the frame is handed to
    /// the kernel; the matching reply arrives on the channel.
    pub async fn send(&self, id: u64, body: &[u8]) -> Result<(), WireError> {
        let frame = protocol::encode_frame(id, body)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }
}

async fn read_loop(index: usize, mut reader: OwnedReadHalf, tx: mpsc::Sender<Frame>) {
    let mut decoder = FrameDecoder::new();
    loop {
        match decoder.read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    // listener is gone, nothing left to correlate
                    break;
                }
            }
            Ok(None) => {
                debug!("connection {} closed by peer", index);
                break;
            }
            Err(e) => {
                warn!("connection {}: read failed: {}", index, e);
                break;
            }
        }
    }
}

fn tune_socket(stream: &TcpStream) -> Result<()> {
    let sock_ref = socket2::SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(15));
    sock_ref.set_tcp_keepalive(&keepalive)?;

    stream.set_nodelay(true)?;

    Ok(())
}
