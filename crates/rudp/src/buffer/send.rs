use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock;
use crate::session::RetryBudget;

/// An outstanding message that has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub seq: i64,
    /// Encoded and framed, ready to go back on the wire unchanged.
    pub data: Vec<u8>,
    pub sent_at: Instant,
    pub retries: u32,
}

/// Outcome of one retransmission pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetransmitReport {
    pub resent: usize,
    /// Sequences dropped because they ran out of retries.
    pub abandoned: Vec<i64>,
}

/// Unacknowledged messages of one session, keyed by sequence number.
#[derive(Debug, Default)]
pub struct SendBuffer {
    entries: Mutex<BTreeMap<i64, SendEntry>>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, seq: i64, data: Vec<u8>) {
        self.insert_at(seq, data, Instant::now());
    }

    pub fn insert_at(&self, seq: i64, data: Vec<u8>, now: Instant) {
        lock(&self.entries).insert(
            seq,
            SendEntry {
                seq,
                data,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Removes an acknowledged entry; false when it was not outstanding.
    pub fn delete(&self, seq: i64) -> bool {
        lock(&self.entries).remove(&seq).is_some()
    }

    pub fn contains(&self, seq: i64) -> bool {
        lock(&self.entries).contains_key(&seq)
    }

    pub fn retries(&self, seq: i64) -> Option<u32> {
        lock(&self.entries).get(&seq).map(|entry| entry.retries)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Resends every entry older than `interval` through `resend`.
    ///
    /// An entry with a limited budget is resent at most that many times; the
    /// pass that would exceed the budget drops it instead and reports it in
    /// [`RetransmitReport::abandoned`]. A disabled budget makes this a no-op.
    ///
    /// `Limited(n)` counts resends only, so an entry goes out at most `n + 1`
    /// times including the original send. The first overdue pass after the
    /// `n`th resend drops it unsent.
    pub fn check<F>(
        &self,
        now: Instant,
        interval: Duration,
        budget: RetryBudget,
        mut resend: F,
    ) -> RetransmitReport
    where
        F: FnMut(&[u8]),
    {
        let mut report = RetransmitReport::default();
        if budget == RetryBudget::Disabled {
            return report;
        }

        let mut entries = lock(&self.entries);
        entries.retain(|&seq, entry| {
            if now.saturating_duration_since(entry.sent_at) < interval {
                return true;
            }

            if let RetryBudget::Limited(max) = budget {
                if entry.retries >= max {
                    report.abandoned.push(seq);
                    return false;
                }
            }

            resend(&entry.data);
            entry.retries += 1;
            entry.sent_at = now;
            report.resent += 1;
            true
        });

        report
    }
}
