use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::info;

use crate::client::Client;
use crate::protocol::Frame;

/// Fixed set of persistent connections shared by every virtual user. All
/// connections are established eagerly; a single failure aborts the run
/// before any request is sent.
pub struct ClientPool {
    clients: Vec<Client>,
    next: AtomicUsize,
}

impl ClientPool {
    /// Connect `size` sessions, spreading them round-robin across the given
    /// server addresses. Returns one reply receiver per connection, in
    /// connection order.
    pub async fn connect(
        addrs: &[SocketAddr],
        size: usize,
        reply_buffer: usize,
    ) -> Result<(Self, Vec<mpsc::Receiver<Frame>>)> {
        if addrs.is_empty() {
            bail!("no server addresses to connect to");
        }
        if size == 0 {
            bail!("pool size must be at least 1");
        }

        let mut clients = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for i in 0..size {
            let addr = addrs[i % addrs.len()];
            let (client, rx) = Client::connect(i, addr, reply_buffer)
                .await
                .with_context(|| format!("failed to establish pooled connection {}", i))?;
            clients.push(client);
            receivers.push(rx);
        }

        info!(
            "connection pool ready: {} connections across {} server(s)",
            size,
            addrs.len()
        );
        Ok((
            Self {
                clients,
                next: AtomicUsize::new(0),
            },
            receivers,
        ))
    }

    /// Round-robin selection off a global atomic index, so the offered load
    /// spreads evenly no matter which worker calls.
    pub fn pick(&self) -> &Client {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[i]
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
