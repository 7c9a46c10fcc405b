use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::harness::RunTotals;
use crate::harness::slots::SlotMatrix;

/// Final state of one run plus the latency distribution pulled from the slot
/// matrix. Built once, after the completion countdown resolves.
pub struct Report {
    pub requested: usize,
    pub issued: usize,
    pub completed: u64,
    pub succeeded: u64,
    pub send_errors: u64,
    pub unresolved: u64,
    pub elapsed: Duration,
    /// Sorted, nanoseconds.
    samples: Vec<u64>,
}

impl Report {
    pub fn build(
        requested: usize,
        issued: usize,
        elapsed: Duration,
        matrix: &SlotMatrix,
        totals: &RunTotals,
    ) -> Self {
        let mut samples = matrix.samples();
        samples.sort_unstable();
        Self {
            requested,
            issued,
            completed: totals.completed.load(Ordering::Acquire),
            succeeded: totals.succeeded.load(Ordering::Acquire),
            send_errors: totals.send_errors.load(Ordering::Acquire),
            unresolved: matrix.unresolved(),
            elapsed,
            samples,
        }
    }

    pub fn throughput(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.completed as f64 / self.elapsed.as_secs_f64()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.samples.first().copied().unwrap_or(0))
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.samples.last().copied().unwrap_or(0))
    }

    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let sum: u128 = self.samples.iter().map(|&ns| ns as u128).sum();
        Duration::from_nanos((sum / self.samples.len() as u128) as u64)
    }

    /// Nearest-rank percentile over the sorted samples.
    pub fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let idx = ((p / 100.0) * (self.samples.len() - 1) as f64).round() as usize;
        Duration::from_nanos(self.samples[idx.min(self.samples.len() - 1)])
    }

    pub fn samples(&self) -> &[u64] {
        &self.samples
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== benchmark report ===")?;
        writeln!(f, "requested:   {}", self.requested)?;
        writeln!(f, "issued:      {}", self.issued)?;
        writeln!(f, "completed:   {}", self.completed)?;
        writeln!(f, "succeeded:   {}", self.succeeded)?;
        writeln!(f, "send errors: {}", self.send_errors)?;
        writeln!(f, "unresolved:  {}", self.unresolved)?;
        writeln!(f, "elapsed:     {:.2?}", self.elapsed)?;
        writeln!(f, "throughput:  {:.2} req/s", self.throughput())?;
        if self.samples.is_empty() {
            write!(f, "no latency samples collected")
        } else {
            writeln!(
                f,
                "latency min/mean/max:    {:?} / {:?} / {:?}",
                self.min(),
                self.mean(),
                self.max()
            )?;
            write!(
                f,
                "latency p50/p90/p95/p99: {:?} / {:?} / {:?} / {:?}",
                self.percentile(50.0),
                self.percentile(90.0),
                self.percentile(95.0),
                self.percentile(99.0)
            )
        }
    }
}
