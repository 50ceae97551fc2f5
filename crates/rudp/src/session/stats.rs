use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub sid: i64,
    pub sent: u64,
    pub retransmitted: u64,
    pub acked: u64,
    pub abandoned: u64,
    pub delivered: u64,
    pub outstanding: usize,
    pub buffered: usize,
}

impl SessionStats {
    /// Percentage of transmissions that never produced an ACK.
    pub fn loss_rate(&self) -> f32 {
        let transmissions = self.sent + self.retransmitted;
        if transmissions == 0 {
            return 0.0;
        }
        (1.0 - self.acked as f32 / transmissions as f32) * 100.0
    }

    pub fn retransmission_rate(&self) -> f32 {
        if self.sent == 0 {
            return 0.0;
        }
        self.retransmitted as f32 / self.sent as f32 * 100.0
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub sent: AtomicU64,
    pub retransmitted: AtomicU64,
    pub acked: AtomicU64,
    pub abandoned: AtomicU64,
    pub delivered: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self, sid: i64) -> SessionStats {
        SessionStats {
            sid,
            sent: self.sent.load(Ordering::Relaxed),
            retransmitted: self.retransmitted.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            outstanding: 0,
            buffered: 0,
        }
    }
}
