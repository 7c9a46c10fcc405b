use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::protocol::{self, BenchMessage, FrameDecoder, STATUS_ERROR, STATUS_OK};

/// Knobs for exercising the harness against controlled server behavior.
/// The indices below count requests globally, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Artificial service time per request.
    pub delay: Duration,
    /// Answer every Nth request with an error status. 0 disables.
    pub fail_every: u64,
    /// Swallow every Nth request without replying. 0 disables.
    pub drop_every: u64,
}

/// Benchmark peer: answers every request with the canonical success message,
/// echoing the request payload back with the status marker and a fixed code.
pub struct BenchServer {
    listener: TcpListener,
    opts: ServerOptions,
    seen: Arc<AtomicU64>,
}

impl BenchServer {
    pub async fn bind(addr: SocketAddr, opts: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        Ok(Self {
            listener,
            opts,
            seen: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!("bench server listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("accepted connection from {}", peer);
                    let opts = self.opts.clone();
                    let seen = self.seen.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, opts, seen).await {
                            warn!("connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("accept failed: {}", e),
            }
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    opts: ServerOptions,
    seen: Arc<AtomicU64>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.split();
    let mut decoder = FrameDecoder::new();

    loop {
        let Some(frame) = decoder.read_frame(&mut reader).await? else {
            return Ok(());
        };
        let index = seen.fetch_add(1, Ordering::Relaxed);

        if opts.drop_every > 0 && index % opts.drop_every == 0 {
            debug!("swallowing request {} without a reply", frame.id);
            continue;
        }

        if !opts.delay.is_zero() {
            sleep(opts.delay).await;
        }

        let failed = opts.fail_every > 0 && index % opts.fail_every == 0;
        let status = if frame.msg.is_none() || failed {
            STATUS_ERROR
        } else {
            STATUS_OK
        };
        let reply = BenchMessage {
            status: status.to_string(),
            code: 100,
            payload: frame.msg.map(|m| m.payload).unwrap_or_default(),
        };

        let body = protocol::encode_body(&reply)?;
        let framed = protocol::encode_frame(frame.id, &body)?;
        writer.write_all(&framed).await?;
    }
}
