use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock;
use crate::protocol::{SEQ_MAX, is_stale, is_valid_seq, next_seq};

#[derive(Debug, Clone)]
pub struct PendingReceive {
    pub seq: i64,
    pub data: Vec<u8>,
    pub arrived_at: Instant,
}

#[derive(Debug, Default)]
struct ReceiveState {
    pending: BTreeMap<i64, PendingReceive>,
    next_seq: i64,
    delivered: bool,
}

/// Reorders incoming DATA so the application sees it in sequence order.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    state: Mutex<ReceiveState>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next_seq(next_seq: i64) -> Self {
        let buffer = Self::new();
        buffer.set_next_seq(next_seq);
        buffer
    }

    pub fn next_seq(&self) -> i64 {
        lock(&self.state).next_seq
    }

    pub fn set_next_seq(&self, seq: i64) {
        lock(&self.state).next_seq = seq.rem_euclid(SEQ_MAX);
    }

    /// Moves the window to `seq` unless something was already delivered.
    pub fn prime(&self, seq: i64) -> bool {
        let mut state = lock(&self.state);
        if state.delivered {
            return false;
        }
        state.next_seq = seq.rem_euclid(SEQ_MAX);
        true
    }

    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).pending.is_empty()
    }

    pub fn smallest_pending(&self) -> Option<i64> {
        lock(&self.state).pending.keys().next().copied()
    }

    pub fn insert(&self, seq: i64, data: Vec<u8>) -> bool {
        self.insert_at(seq, data, Instant::now())
    }

    /// Buffers `data`; false for stale or duplicate sequences.
    pub fn insert_at(&self, seq: i64, data: Vec<u8>, now: Instant) -> bool {
        if !is_valid_seq(seq) {
            log::debug!("Dropping out-of-range seq {}", seq);
            return false;
        }

        let mut state = lock(&self.state);

        if is_stale(seq, state.next_seq) {
            log::debug!("Dropping stale seq {} (expecting {})", seq, state.next_seq);
            return false;
        }

        if state.pending.contains_key(&seq) {
            log::debug!("Dropping duplicate seq {}", seq);
            return false;
        }

        state.pending.insert(
            seq,
            PendingReceive {
                seq,
                data,
                arrived_at: now,
            },
        );
        true
    }

    /// Takes the payload for the next expected sequence, if it has arrived.
    pub fn get_data(&self) -> Option<Vec<u8>> {
        let mut state = lock(&self.state);
        let expected = state.next_seq;
        let entry = state.pending.remove(&expected)?;
        state.next_seq = next_seq(expected);
        state.delivered = true;
        Some(entry.data)
    }

    /// Force-delivers the smallest pending sequence once it has waited longer
    /// than `timeout`, skipping whatever gap precedes it for good.
    pub fn get_timeout_data(&self, now: Instant, timeout: Duration) -> Option<Vec<u8>> {
        let mut state = lock(&self.state);
        let (&seq, entry) = state.pending.first_key_value()?;

        if now.saturating_duration_since(entry.arrived_at) <= timeout {
            return None;
        }

        if seq != state.next_seq {
            log::debug!(
                "Gap timeout: skipping from seq {} to {}",
                state.next_seq,
                seq
            );
        }

        let entry = state.pending.remove(&seq)?;
        state.next_seq = next_seq(seq);
        state.delivered = true;
        Some(entry.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[test]
    fn test_in_order_release() {
        let buffer = ReceiveBuffer::with_next_seq(3);

        assert!(buffer.insert(5, b"five".to_vec()));
        assert!(buffer.insert(3, b"three".to_vec()));
        assert!(buffer.insert(4, b"four".to_vec()));

        assert_eq!(buffer.get_data(), Some(b"three".to_vec()));
        assert_eq!(buffer.get_data(), Some(b"four".to_vec()));
        assert_eq!(buffer.get_data(), Some(b"five".to_vec()));
        assert_eq!(buffer.get_data(), None);
        assert_eq!(buffer.next_seq(), 6);
    }

    #[test]
    fn test_holds_back_until_gap_fills() {
        let buffer = ReceiveBuffer::new();
        assert!(buffer.insert(1, vec![1]));

        assert_eq!(buffer.get_data(), None);
        assert_eq!(buffer.next_seq(), 0);

        assert!(buffer.insert(0, vec![0]));
        assert_eq!(buffer.get_data(), Some(vec![0]));
        assert_eq!(buffer.get_data(), Some(vec![1]));
    }

    #[test]
    fn test_duplicate_rejected() {
        let buffer = ReceiveBuffer::new();

        assert!(buffer.insert(2, b"first".to_vec()));
        assert!(!buffer.insert(2, b"second".to_vec()));
        assert_eq!(buffer.len(), 1);

        buffer.insert(0, vec![]);
        buffer.insert(1, vec![]);
        buffer.get_data();
        buffer.get_data();
        assert_eq!(buffer.get_data(), Some(b"first".to_vec()));
    }

    #[test]
    fn test_stale_rejected() {
        let buffer = ReceiveBuffer::with_next_seq(100);

        assert!(!buffer.insert(50, vec![50]));
        assert!(buffer.is_empty());

        assert!(buffer.insert(SEQ_MAX - 10, vec![1]));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.next_seq(), 100);
    }

    #[test]
    fn test_wraparound_delivery() {
        let buffer = ReceiveBuffer::with_next_seq(SEQ_MAX - 1);

        assert!(buffer.insert(0, b"after".to_vec()));
        assert!(buffer.insert(SEQ_MAX - 1, b"before".to_vec()));

        assert_eq!(buffer.get_data(), Some(b"before".to_vec()));
        assert_eq!(buffer.next_seq(), 0);
        assert_eq!(buffer.get_data(), Some(b"after".to_vec()));
        assert_eq!(buffer.next_seq(), 1);
    }

    #[test]
    fn test_gap_timeout_skips_missing() {
        let buffer = ReceiveBuffer::with_next_seq(5);
        let start = Instant::now();
        assert!(buffer.insert_at(7, b"seven".to_vec(), start));

        assert_eq!(buffer.get_data(), None);
        assert_eq!(buffer.get_timeout_data(start + TIMEOUT, TIMEOUT), None);

        let later = start + TIMEOUT + Duration::from_millis(1);
        assert_eq!(
            buffer.get_timeout_data(later, TIMEOUT),
            Some(b"seven".to_vec())
        );
        assert_eq!(buffer.next_seq(), 8);

        // The skipped sequences are now stale.
        assert!(!buffer.insert(5, vec![5]));
        assert!(!buffer.insert(6, vec![6]));
    }

    #[test]
    fn test_gap_timeout_only_looks_at_smallest() {
        let buffer = ReceiveBuffer::with_next_seq(0);
        let start = Instant::now();
        buffer.insert_at(4, vec![4], start + TIMEOUT);
        buffer.insert_at(9, vec![9], start);

        let now = start + TIMEOUT + Duration::from_millis(1);
        assert_eq!(buffer.get_timeout_data(now, TIMEOUT), None);
        assert_eq!(buffer.smallest_pending(), Some(4));
    }

    #[test]
    fn test_gap_timeout_then_in_order() {
        let buffer = ReceiveBuffer::with_next_seq(0);
        let start = Instant::now();
        buffer.insert_at(2, vec![2], start);
        buffer.insert_at(3, vec![3], start);

        let now = start + TIMEOUT * 2;
        assert_eq!(buffer.get_timeout_data(now, TIMEOUT), Some(vec![2]));
        assert_eq!(buffer.get_data(), Some(vec![3]));
        assert_eq!(buffer.get_data(), None);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let buffer = ReceiveBuffer::with_next_seq(SEQ_MAX - 1);

        assert!(!buffer.insert(i64::MAX, vec![1]));
        assert!(!buffer.insert(SEQ_MAX, vec![2]));
        assert!(!buffer.insert(-1, vec![3]));
        assert!(buffer.is_empty());

        let now = Instant::now() + TIMEOUT * 4;
        assert_eq!(buffer.get_timeout_data(now, TIMEOUT), None);
        assert_eq!(buffer.next_seq(), SEQ_MAX - 1);
    }

    #[test]
    fn test_window_is_normalised() {
        let buffer = ReceiveBuffer::with_next_seq(SEQ_MAX + 4);
        assert_eq!(buffer.next_seq(), 4);

        buffer.set_next_seq(-1);
        assert_eq!(buffer.next_seq(), SEQ_MAX - 1);
    }

    #[test]
    fn test_prime_only_before_delivery() {
        let buffer = ReceiveBuffer::new();
        assert!(buffer.prime(10));
        assert_eq!(buffer.next_seq(), 10);

        assert!(buffer.insert(10, vec![10]));
        assert_eq!(buffer.get_data(), Some(vec![10]));

        assert!(!buffer.prime(3));
        assert_eq!(buffer.next_seq(), 11);
        assert!(!buffer.insert(10, vec![10]));
    }

    #[test]
    fn test_empty_timeout_is_noop() {
        let buffer = ReceiveBuffer::with_next_seq(10);
        let now = Instant::now() + TIMEOUT * 4;
        assert_eq!(buffer.get_timeout_data(now, TIMEOUT), None);
        assert_eq!(buffer.next_seq(), 10);
    }
}
