mod config;
mod stats;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use config::{
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_RETRANSMISSION_INTERVAL_MS, RetryBudget, SessionConfig,
};
pub use stats::SessionStats;

use stats::SessionCounters;

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::error::{TransportError, TransportResult};
use crate::lock;
use crate::net::DatagramSink;
use crate::protocol::{AckMsg, DataMsg, Framer, RegisterMsg, RegisterRsMsg, next_seq};

/// One reliable, ordered connection to a peer.
///
/// Every REG, REG_RS and DATA consumes a send sequence and stays in the send
/// buffer until the peer ACKs it. ACKs carry the sequence they confirm and are
/// never buffered.
pub struct Session {
    sid: i64,
    destination: SocketAddr,
    next_send_seq: Mutex<i64>,
    config: Mutex<SessionConfig>,
    send_buffer: SendBuffer,
    recv_buffer: ReceiveBuffer,
    counters: SessionCounters,
    register_seq: Mutex<Option<i64>>,
    established: AtomicBool,
    framer: Framer,
    sink: Arc<dyn DatagramSink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("destination", &self.destination)
            .field("outstanding", &self.send_buffer.len())
            .field("buffered", &self.recv_buffer.len())
            .finish()
    }
}

impl Session {
    pub fn new(
        sid: i64,
        destination: SocketAddr,
        config: SessionConfig,
        framer: Framer,
        sink: Arc<dyn DatagramSink>,
    ) -> Self {
        Self {
            sid,
            destination,
            next_send_seq: Mutex::new(0),
            config: Mutex::new(config),
            send_buffer: SendBuffer::new(),
            recv_buffer: ReceiveBuffer::new(),
            counters: SessionCounters::default(),
            register_seq: Mutex::new(None),
            established: AtomicBool::new(false),
            framer,
            sink,
        }
    }

    pub fn sid(&self) -> i64 {
        self.sid
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn config(&self) -> SessionConfig {
        *lock(&self.config)
    }

    pub fn set_config(&self, config: SessionConfig) {
        *lock(&self.config) = config;
    }

    pub fn set_max_retransmissions(&self, retry: RetryBudget) {
        lock(&self.config).retry = retry;
    }

    pub fn set_retransmission_interval(&self, interval: Duration) {
        lock(&self.config).retransmission_interval = interval;
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        lock(&self.config).read_timeout = timeout;
    }

    pub fn send_buffer(&self) -> &SendBuffer {
        &self.send_buffer
    }

    pub fn recv_buffer(&self) -> &ReceiveBuffer {
        &self.recv_buffer
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }

    /// Next sequence this session will assign to an outgoing message.
    pub fn peek_send_seq(&self) -> i64 {
        *lock(&self.next_send_seq)
    }

    fn allocate_seq(&self) -> i64 {
        let mut next = lock(&self.next_send_seq);
        let seq = *next;
        *next = next_seq(seq);
        seq
    }

    fn send_retriable(&self, seq: i64, encoded: Vec<u8>) {
        let framed = self.framer.wrap(&encoded);
        self.send_buffer.insert(seq, framed.clone());
        SessionCounters::bump(&self.counters.sent, 1);
        self.sink.send_datagram(framed, self.destination);
    }

    /// Opens the handshake by sending REG for this session's id.
    pub fn send_register(&self) -> TransportResult<i64> {
        let seq = self.allocate_seq();
        let encoded = RegisterMsg { seq, sid: self.sid }.to_envelope()?;
        *lock(&self.register_seq) = Some(seq);
        self.send_retriable(seq, encoded);
        log::debug!("Session {} sent REG seq {}", self.sid, seq);
        Ok(seq)
    }

    pub fn send_register_rs(&self, code: i64) -> TransportResult<i64> {
        let seq = self.allocate_seq();
        let encoded = RegisterRsMsg {
            seq,
            sid: self.sid,
            code,
        }
        .to_envelope()?;
        self.send_retriable(seq, encoded);
        log::debug!("Session {} sent REG_RS seq {} code {}", self.sid, seq, code);
        Ok(seq)
    }

    pub fn send_data(&self, data: &[u8]) -> TransportResult<i64> {
        let seq = self.allocate_seq();
        let encoded = DataMsg {
            seq,
            sid: self.sid,
            data: data.to_vec(),
        }
        .to_envelope()?;
        self.send_retriable(seq, encoded);
        Ok(seq)
    }

    pub fn send_ack(&self, seq: i64) -> TransportResult<()> {
        let encoded = AckMsg { seq, sid: self.sid }.to_envelope()?;
        self.sink.send_datagram(self.framer.wrap(&encoded), self.destination);
        Ok(())
    }

    /// Clears the acknowledged entry; false for unknown or repeated ACKs.
    pub fn on_ack(&self, seq: i64) -> bool {
        let acked = self.send_buffer.delete(seq);
        if acked {
            SessionCounters::bump(&self.counters.acked, 1);
        }
        acked
    }

    /// Buffers incoming DATA; true when it was new.
    pub fn on_data_recv(&self, seq: i64, data: Vec<u8>) -> bool {
        self.recv_buffer.insert(seq, data)
    }

    /// The first DATA from the peer follows its handshake message `seq`.
    /// Ignored once anything has been delivered.
    pub fn prime_receive(&self, seq: i64) -> bool {
        self.recv_buffer.prime(next_seq(seq))
    }

    /// Handles REG_RS on the initiating side. The response proves our REG
    /// arrived, so it stops being retransmitted. Returns true only the first
    /// time, when the handshake completes.
    pub fn on_register_rs(&self, seq: i64) -> bool {
        if let Some(register_seq) = lock(&self.register_seq).take() {
            self.on_ack(register_seq);
        }

        if self.established.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.prime_receive(seq);
        true
    }

    /// Marks an accepted session as established.
    pub fn establish(&self) {
        self.established.store(true, Ordering::SeqCst);
    }

    pub fn retransmission_check(&self) -> Vec<TransportError> {
        self.retransmission_check_at(Instant::now())
    }

    /// Resends overdue entries; every entry that ran out of retries comes back
    /// as [`TransportError::DeliveryGiveUp`].
    pub fn retransmission_check_at(&self, now: Instant) -> Vec<TransportError> {
        let config = self.config();
        let report = self.send_buffer.check(
            now,
            config.retransmission_interval,
            config.retry,
            |data| self.sink.send_immediate(data, self.destination),
        );

        SessionCounters::bump(&self.counters.retransmitted, report.resent as u64);
        SessionCounters::bump(&self.counters.abandoned, report.abandoned.len() as u64);

        report
            .abandoned
            .into_iter()
            .map(|seq| TransportError::DeliveryGiveUp { sid: self.sid, seq })
            .collect()
    }

    /// Next in-order payload, if any.
    pub fn get_data(&self) -> Option<Vec<u8>> {
        let data = self.recv_buffer.get_data()?;
        SessionCounters::bump(&self.counters.delivered, 1);
        Some(data)
    }

    /// Oldest buffered payload once it has outlived the read timeout.
    pub fn get_timeout_data(&self, now: Instant) -> Option<Vec<u8>> {
        let timeout = self.config().read_timeout;
        let data = self.recv_buffer.get_timeout_data(now, timeout)?;
        SessionCounters::bump(&self.counters.delivered, 1);
        Some(data)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            outstanding: self.send_buffer.len(),
            buffered: self.recv_buffer.len(),
            ..self.counters.snapshot(self.sid)
        }
    }

    pub fn loss_rate(&self) -> f32 {
        self.stats().loss_rate()
    }

    pub fn retransmission_rate(&self) -> f32 {
        self.stats().retransmission_rate()
    }
}
