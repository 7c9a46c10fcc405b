pub mod gate;
pub mod slots;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::future;
use tokio::sync::{Barrier, Semaphore, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::pool::ClientPool;
use crate::protocol::{self, Frame, STATUS_OK};
use crate::report::Report;
use gate::StartGate;
use slots::SlotMatrix;

/// Process-wide result counters, bumped with atomic adds only and read after
/// the completion countdown resolves.
#[derive(Default)]
pub struct RunTotals {
    pub completed: AtomicU64,
    pub succeeded: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Execute one measurement run: connect the pool, line the workers up behind
/// the start gate, drive the configured load, and wait for every reply to be
/// accounted for before building the report.
pub async fn run(cfg: &Config) -> Result<Report> {
    let addrs = cfg.server_addrs()?;
    let workers = cfg.concurrency;
    let per_worker = cfg.requests / workers;
    // the remainder (requests mod concurrency) is never sent
    let issued_target = workers * per_worker;
    let quota = issued_target.div_ceil(cfg.pool);

    info!("concurrency: {}  requests per worker: {}", workers, per_worker);
    info!("pool: {}  requests per connection: {}", cfg.pool, quota);

    let args = protocol::prepare_args(cfg.payload_bytes);
    let body = protocol::encode_body(&args)?;
    info!("message size: {} bytes", body.len());

    let (pool, receivers) = ClientPool::connect(&addrs, cfg.pool, quota).await?;
    let pool = Arc::new(pool);

    let matrix = Arc::new(SlotMatrix::new(cfg.pool, quota));
    let totals = Arc::new(RunTotals::default());
    // completion countdown: listeners (and failed sends) add one permit per
    // request, the main flow acquires the full issued target
    let outstanding = Arc::new(Semaphore::new(0));

    for (conn, rx) in receivers.into_iter().enumerate() {
        tokio::spawn(listen(
            conn,
            rx,
            matrix.clone(),
            totals.clone(),
            outstanding.clone(),
        ));
    }

    let limiter = (cfg.rate > 0).then(|| {
        // cap the burst window at roughly 10ms of tokens
        Arc::new(RateLimiter::with_capacity(cfg.rate, (cfg.rate / 100).max(1)))
    });

    let gate = StartGate::new(workers);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        handles.push(tokio::spawn(drive(
            per_worker,
            gate.barrier(),
            limiter.clone(),
            pool.clone(),
            matrix.clone(),
            totals.clone(),
            outstanding.clone(),
            body.clone(),
        )));
    }

    let start = gate.released().await?;
    future::join_all(handles).await;
    debug!("all workers done sending");

    let deadline = Duration::from_secs(cfg.timeout_secs);
    match timeout(deadline, outstanding.acquire_many(issued_target as u32)).await {
        Ok(permit) => permit.context("completion countdown closed")?.forget(),
        Err(_) => warn!(
            "drain deadline of {:?} reached with replies still outstanding",
            deadline
        ),
    }

    let elapsed = start.elapsed();
    Ok(Report::build(
        cfg.requests,
        issued_target,
        elapsed,
        &matrix,
        &totals,
    ))
}

/// One virtual user: exactly `per_worker` requests, paced by the shared
/// limiter, each sent on whichever connection the pool's round-robin picks.
/// Never waits for its own replies.
async fn drive(
    per_worker: usize,
    barrier: Arc<Barrier>,
    limiter: Option<Arc<RateLimiter>>,
    pool: Arc<ClientPool>,
    matrix: Arc<SlotMatrix>,
    totals: Arc<RunTotals>,
    outstanding: Arc<Semaphore>,
    body: Bytes,
) {
    barrier.wait().await;

    for _ in 0..per_worker {
        if let Some(limiter) = &limiter {
            limiter.acquire().await;
        }

        // stamp after pacing, so throttle delay never counts as latency
        let stamp = matrix.stamp();
        let client = pool.pick();
        let id = client.reserve_id();
        // the slot is filled before the frame hits the wire, so a fast
        // reply can never observe it empty
        matrix.record_issue(client.index(), id, stamp);

        if let Err(e) = client.send(id, &body).await {
            warn!("connection {}: send failed: {}", client.index(), e);
            matrix.clear_issue(client.index(), id);
            totals.send_errors.fetch_add(1, Ordering::Relaxed);
            // no reply will ever arrive for this request
            outstanding.add_permits(1);
        }
    }
}

/// One listener per pooled connection: consumes its reply channel for the
/// lifetime of the run, resolving each reply against the slot matrix.
async fn listen(
    conn: usize,
    mut replies: mpsc::Receiver<Frame>,
    matrix: Arc<SlotMatrix>,
    totals: Arc<RunTotals>,
    outstanding: Arc<Semaphore>,
) {
    while let Some(frame) = replies.recv().await {
        let now = matrix.stamp();
        if matrix.complete(conn, frame.id, now).is_none() {
            warn!(
                "connection {}: reply {} matches no outstanding request",
                conn, frame.id
            );
        }

        match &frame.msg {
            Some(msg) if msg.status == STATUS_OK => {
                totals.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(msg) => warn!(
                "connection {}: reply {} returned status {:?}",
                conn, frame.id, msg.status
            ),
            // body decode failures are logged by the codec
            None => {}
        }

        totals.completed.fetch_add(1, Ordering::Relaxed);
        outstanding.add_permits(1);
    }
    debug!("listener {} finished", conn);
}
