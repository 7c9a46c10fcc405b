use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Barrier, oneshot};
use tokio::time::Instant;

/// Two-phase start gate: every worker plus one timer task registers, then
/// all release together and the timer task captures the authoritative start
/// instant. Workers that finish setup early cannot skew the measurement
/// window, and the release is one-shot for the run.
pub struct StartGate {
    barrier: Arc<Barrier>,
    released: oneshot::Receiver<Instant>,
}

impl StartGate {
    pub fn new(workers: usize) -> Self {
        // +1 participant: the timer task that stamps the start
        let barrier = Arc::new(Barrier::new(workers + 1));
        let (tx, rx) = oneshot::channel();

        let timer = barrier.clone();
        tokio::spawn(async move {
            timer.wait().await;
            let _ = tx.send(Instant::now());
        });

        Self {
            barrier,
            released: rx,
        }
    }

    /// Handle a worker waits on before issuing its first request.
    pub fn barrier(&self) -> Arc<Barrier> {
        self.barrier.clone()
    }

    /// Resolves once every participant has registered; yields the start
    /// instant captured at release.
    pub async fn released(self) -> Result<Instant> {
        Ok(self.released.await?)
    }
}
