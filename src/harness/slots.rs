use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::warn;

/// One cell per (connection, correlation id). `issued_ns` holds the send
/// timestamp, stored with a +1 offset so 0 always means "never issued";
/// `latency_ns` stays 0 until the reply lands. Keeping the two fields
/// separate means an unsent slot can never read as a zero-latency sample.
#[derive(Default)]
struct Slot {
    issued_ns: AtomicU64,
    latency_ns: AtomicU64,
}

/// Per-connection latency sample storage, allocated in full before any
/// request is sent. The issuing worker and the completing listener touch
/// the same cell at different times, so per-cell atomics are the only
/// synchronization needed.
pub struct SlotMatrix {
    anchor: Instant,
    conns: Vec<Vec<Slot>>,
}

impl SlotMatrix {
    /// `quota` slots per connection, sized to the ceiling of
    /// issued-requests / pool so round-robin remainders cannot overflow.
    pub fn new(pool: usize, quota: usize) -> Self {
        let conns = (0..pool)
            .map(|_| (0..quota).map(|_| Slot::default()).collect())
            .collect();
        Self {
            anchor: Instant::now(),
            conns,
        }
    }

    /// Nanoseconds since the matrix's anchor, offset so it is never 0.
    pub fn stamp(&self) -> u64 {
        self.anchor.elapsed().as_nanos() as u64 + 1
    }

    fn slot(&self, conn: usize, id: u64) -> Option<&Slot> {
        if id == 0 {
            return None;
        }
        self.conns.get(conn)?.get(id as usize - 1)
    }

    pub fn record_issue(&self, conn: usize, id: u64, stamp: u64) {
        match self.slot(conn, id) {
            Some(slot) => slot.issued_ns.store(stamp, Ordering::Release),
            None => warn!(
                "connection {}: correlation id {} exceeds the slot quota",
                conn, id
            ),
        }
    }

    /// Forget an issue timestamp after a failed send.
    pub fn clear_issue(&self, conn: usize, id: u64) {
        if let Some(slot) = self.slot(conn, id) {
            slot.issued_ns.store(0, Ordering::Release);
        }
    }

    /// Resolve a reply against its issue timestamp. Returns the measured
    /// latency, or None when the id is out of range or was never issued; a
    /// stray reply must not disturb any other slot.
    pub fn complete(&self, conn: usize, id: u64, now: u64) -> Option<u64> {
        let slot = self.slot(conn, id)?;
        let issued = slot.issued_ns.load(Ordering::Acquire);
        if issued == 0 {
            return None;
        }
        let latency = now.saturating_sub(issued).max(1);
        slot.latency_ns.store(latency, Ordering::Release);
        Some(latency)
    }

    /// All resolved samples, in connection then correlation-id order.
    pub fn samples(&self) -> Vec<u64> {
        self.conns
            .iter()
            .flat_map(|conn| conn.iter())
            .map(|slot| slot.latency_ns.load(Ordering::Acquire))
            .filter(|&ns| ns > 0)
            .collect()
    }

    /// Slots that were issued but never resolved (lost replies).
    pub fn unresolved(&self) -> u64 {
        self.conns
            .iter()
            .flat_map(|conn| conn.iter())
            .filter(|slot| {
                slot.issued_ns.load(Ordering::Acquire) != 0
                    && slot.latency_ns.load(Ordering::Acquire) == 0
            })
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_against_its_own_slot_only() {
        let matrix = SlotMatrix::new(2, 4);

        matrix.record_issue(0, 1, 100);
        matrix.record_issue(0, 2, 200);
        matrix.record_issue(1, 1, 300);

        // replies arrive out of order across connections
        assert_eq!(matrix.complete(1, 1, 350), Some(50));
        assert_eq!(matrix.complete(0, 2, 260), Some(60));
        assert_eq!(matrix.complete(0, 1, 170), Some(70));

        let mut samples = matrix.samples();
        samples.sort_unstable();
        assert_eq!(samples, vec![50, 60, 70]);
    }

    #[test]
    fn out_of_range_ids_are_dropped() {
        let matrix = SlotMatrix::new(1, 2);
        matrix.record_issue(0, 1, 10);

        assert_eq!(matrix.complete(0, 0, 99), None);
        assert_eq!(matrix.complete(0, 3, 99), None);
        assert_eq!(matrix.complete(5, 1, 99), None);

        // the in-range slot is untouched by the strays
        assert_eq!(matrix.complete(0, 1, 40), Some(30));
    }

    #[test]
    fn replies_without_an_issue_timestamp_are_dropped() {
        let matrix = SlotMatrix::new(1, 2);
        assert_eq!(matrix.complete(0, 1, 99), None);
        assert!(matrix.samples().is_empty());
    }

    #[test]
    fn cleared_slots_do_not_resolve() {
        let matrix = SlotMatrix::new(1, 2);
        matrix.record_issue(0, 1, 10);
        matrix.clear_issue(0, 1);
        assert_eq!(matrix.complete(0, 1, 99), None);
    }

    #[test]
    fn unresolved_counts_issued_but_unanswered_slots() {
        let matrix = SlotMatrix::new(1, 4);
        matrix.record_issue(0, 1, 10);
        matrix.record_issue(0, 2, 20);
        matrix.complete(0, 1, 50);

        assert_eq!(matrix.unresolved(), 1);
    }

    #[test]
    fn identical_stamps_still_produce_a_positive_sample() {
        let matrix = SlotMatrix::new(1, 1);
        matrix.record_issue(0, 1, 10);
        assert_eq!(matrix.complete(0, 1, 10), Some(1));
    }
}
