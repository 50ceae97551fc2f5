mod handler;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub use handler::{EngineEvent, EventQueue, SessionCode, SessionHandler};

use crate::error::{TransportError, TransportResult};
use crate::lock;
use crate::net::{DatagramReceiver, DatagramSink, UdpTransport};
use crate::protocol::{
    AckMsg, CODE_OK, CODE_SESSION_EXISTS, DataMsg, Envelope, Framer, MessageKind, RegisterMsg,
    RegisterRsMsg, is_valid_seq,
};
use crate::session::{RetryBudget, Session, SessionConfig, SessionStats};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub framer: Framer,
    /// Applied to every new session, tunable per session afterwards.
    pub session: SessionConfig,
    pub retransmission_period: Duration,
    /// Upper bound on how long received data waits without a wake-up signal.
    pub drain_period: Duration,
    pub timeout_sweep_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            framer: Framer::default(),
            session: SessionConfig::default(),
            retransmission_period: Duration::from_millis(50),
            drain_period: Duration::from_millis(100),
            timeout_sweep_period: Duration::from_millis(250),
        }
    }
}

/// Session table, handshake and dispatch for one socket.
///
/// Inbound datagrams enter through [`DatagramReceiver::on_datagram`]. Three
/// background threads started by [`Engine::start`] retransmit unacknowledged
/// messages, drain in-order data to the [`SessionHandler`], and force delivery
/// past gaps that outlive the read timeout.
pub struct Engine {
    config: EngineConfig,
    sessions: Mutex<HashMap<i64, Arc<Session>>>,
    sink: Arc<dyn DatagramSink>,
    handler: Arc<dyn SessionHandler>,
    transport: Mutex<Option<Arc<UdpTransport>>>,
    wake_tx: SyncSender<()>,
    wake_rx: Mutex<Option<Receiver<()>>>,
    delivery: Mutex<()>,
    last_sid: Mutex<i64>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn DatagramSink>,
        handler: Arc<dyn SessionHandler>,
    ) -> Arc<Self> {
        let (wake_tx, wake_rx) = mpsc::sync_channel(1);

        Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            sink,
            handler,
            transport: Mutex::new(None),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            delivery: Mutex::new(()),
            last_sid: Mutex::new(0),
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Binds `addr`, wires the socket to a new engine and starts everything.
    pub fn listen<A: ToSocketAddrs>(
        addr: A,
        config: EngineConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> io::Result<Arc<Self>> {
        let transport = UdpTransport::listen(addr)?;
        Self::with_transport(transport, config, handler)
    }

    /// Like [`Engine::listen`] on an ephemeral port, for initiating sessions
    /// towards `remote`.
    pub fn dial(
        remote: SocketAddr,
        config: EngineConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> io::Result<Arc<Self>> {
        let transport = UdpTransport::dial(remote)?;
        Self::with_transport(transport, config, handler)
    }

    fn with_transport(
        transport: Arc<UdpTransport>,
        config: EngineConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> io::Result<Arc<Self>> {
        let engine = Self::new(config, transport.clone(), handler);
        *lock(&engine.transport) = Some(transport.clone());
        transport.start(engine.clone())?;
        engine.start()?;
        log::info!("Engine listening on {}", transport.local_addr());
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> Option<Arc<UdpTransport>> {
        lock(&self.transport).clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport().map(|transport| transport.local_addr())
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Spawns the retransmission, delivery and gap-timeout threads.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let wake_rx = lock(&self.wake_rx).take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "engine already started")
        })?;

        let engine = Arc::clone(self);
        let retransmit = thread::Builder::new()
            .name("rudp-retransmit".into())
            .spawn(move || engine.retransmission_loop())?;

        let engine = Arc::clone(self);
        let drain = thread::Builder::new()
            .name("rudp-deliver".into())
            .spawn(move || engine.delivery_loop(wake_rx))?;

        let engine = Arc::clone(self);
        let timeout = thread::Builder::new()
            .name("rudp-gap-timeout".into())
            .spawn(move || engine.timeout_loop())?;

        lock(&self.threads).extend([retransmit, drain, timeout]);
        Ok(())
    }

    /// Stops the background threads and the owned socket, if any.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.signal_delivery();

        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        if let Some(transport) = lock(&self.transport).take() {
            transport.shutdown();
        }
        log::info!("Engine stopped");
    }

    pub fn session(&self, sid: i64) -> Option<Arc<Session>> {
        lock(&self.sessions).get(&sid).cloned()
    }

    pub fn session_ids(&self) -> Vec<i64> {
        lock(&self.sessions).keys().copied().collect()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        lock(&self.sessions).values().cloned().collect()
    }

    fn require(&self, sid: i64, kind: MessageKind) -> TransportResult<Arc<Session>> {
        self.session(sid)
            .ok_or(TransportError::UnknownSession { sid, kind })
    }

    /// Session ids are creation timestamps in nanoseconds, bumped when the
    /// clock has not moved since the last one.
    fn generate_sid(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as i64)
            .unwrap_or_default();

        let mut last = lock(&self.last_sid);
        let sid = now.max(*last + 1);
        *last = sid;
        sid
    }

    /// Registers a new local session and sends REG to `destination`.
    /// The outcome arrives later through [`SessionHandler::on_session_create`].
    pub fn create_session(&self, destination: SocketAddr) -> TransportResult<i64> {
        let session = {
            let mut sessions = lock(&self.sessions);
            let mut sid = self.generate_sid();
            while sessions.contains_key(&sid) {
                sid = self.generate_sid();
            }

            let session = Arc::new(self.new_session(sid, destination));
            sessions.insert(sid, session.clone());
            session
        };

        if let Err(e) = session.send_register() {
            self.close_session(session.sid());
            return Err(e);
        }

        log::info!(
            "Created session {} towards {}",
            session.sid(),
            destination
        );
        Ok(session.sid())
    }

    fn new_session(&self, sid: i64, destination: SocketAddr) -> Session {
        Session::new(
            sid,
            destination,
            self.config.session,
            self.config.framer.clone(),
            self.sink.clone(),
        )
    }

    /// Removes a session. Anything still buffered for it is discarded.
    pub fn close_session(&self, sid: i64) -> Option<Arc<Session>> {
        let removed = lock(&self.sessions).remove(&sid);
        if removed.is_some() {
            log::info!("Closed session {}", sid);
        }
        removed
    }

    pub fn send_data(&self, sid: i64, data: &[u8]) -> TransportResult<i64> {
        self.require(sid, MessageKind::Data)?.send_data(data)
    }

    pub fn set_max_retransmissions(&self, sid: i64, retry: RetryBudget) -> TransportResult<()> {
        self.require(sid, MessageKind::Data)?
            .set_max_retransmissions(retry);
        Ok(())
    }

    pub fn set_retransmission_interval(&self, sid: i64, interval: Duration) -> TransportResult<()> {
        self.require(sid, MessageKind::Data)?
            .set_retransmission_interval(interval);
        Ok(())
    }

    pub fn set_read_timeout(&self, sid: i64, timeout: Duration) -> TransportResult<()> {
        self.require(sid, MessageKind::Data)?
            .set_read_timeout(timeout);
        Ok(())
    }

    pub fn stats(&self) -> Vec<SessionStats> {
        let mut stats: Vec<_> = self.snapshot().iter().map(|s| s.stats()).collect();
        stats.sort_by_key(|s| s.sid);
        stats
    }

    /// Validates, unframes and decodes one datagram, then dispatches it.
    pub fn receive_datagram(&self, datagram: &[u8], source: SocketAddr) -> TransportResult<()> {
        let framer = &self.config.framer;
        if !framer.validate(datagram) {
            return Err(TransportError::Framing {
                len: datagram.len(),
            });
        }

        let envelope = Envelope::deserialize(framer.unwrap(datagram))?;
        self.dispatch(&envelope, source)
    }

    pub fn dispatch(&self, envelope: &Envelope, source: SocketAddr) -> TransportResult<()> {
        let kind = envelope.kind;
        match kind {
            MessageKind::Data => {
                let msg = DataMsg::deserialize(&envelope.payload)?;
                check_seq(msg.sid, msg.seq, kind)?;
                self.process_data(msg)
            }
            MessageKind::Ack => {
                let msg = AckMsg::deserialize(&envelope.payload)?;
                check_seq(msg.sid, msg.seq, kind)?;
                self.process_ack(msg)
            }
            MessageKind::Register => {
                let msg = RegisterMsg::deserialize(&envelope.payload)?;
                check_seq(msg.sid, msg.seq, kind)?;
                self.process_register(msg, source)
            }
            MessageKind::RegisterRs => {
                let msg = RegisterRsMsg::deserialize(&envelope.payload)?;
                check_seq(msg.sid, msg.seq, kind)?;
                self.process_register_rs(msg)
            }
        }
    }

    fn process_data(&self, msg: DataMsg) -> TransportResult<()> {
        let session = self.require(msg.sid, MessageKind::Data)?;

        // Duplicates are ACKed again, the first ACK may have been lost.
        session.send_ack(msg.seq)?;
        if session.on_data_recv(msg.seq, msg.data) {
            self.signal_delivery();
        }
        Ok(())
    }

    fn process_ack(&self, msg: AckMsg) -> TransportResult<()> {
        let session = self.require(msg.sid, MessageKind::Ack)?;
        if !session.on_ack(msg.seq) {
            log::debug!("Session {} ignoring ACK for seq {}", msg.sid, msg.seq);
        }
        Ok(())
    }

    fn process_register(&self, msg: RegisterMsg, source: SocketAddr) -> TransportResult<()> {
        let session = {
            let mut sessions = lock(&self.sessions);
            if sessions.contains_key(&msg.sid) {
                None
            } else {
                let session = Arc::new(self.new_session(msg.sid, source));
                session.prime_receive(msg.seq);
                session.establish();
                sessions.insert(msg.sid, session.clone());
                Some(session)
            }
        };

        let Some(session) = session else {
            self.send_session_exists(msg.sid, source)?;
            return Err(TransportError::SessionExists { sid: msg.sid });
        };

        session.send_ack(msg.seq)?;
        session.send_register_rs(CODE_OK)?;
        log::info!("Accepted session {} from {}", msg.sid, source);
        self.handler.on_session_accept(msg.sid, source);
        Ok(())
    }

    // No session backs this response, so it is sent once and never retried.
    fn send_session_exists(&self, sid: i64, destination: SocketAddr) -> TransportResult<()> {
        let encoded = RegisterRsMsg {
            seq: 0,
            sid,
            code: CODE_SESSION_EXISTS,
        }
        .to_envelope()?;
        self.sink
            .send_datagram(self.config.framer.wrap(&encoded), destination);
        Ok(())
    }

    fn process_register_rs(&self, msg: RegisterRsMsg) -> TransportResult<()> {
        let Some(session) = self.session(msg.sid) else {
            self.handler.on_session_error(
                msg.sid,
                TransportError::UnknownSession {
                    sid: msg.sid,
                    kind: MessageKind::RegisterRs,
                },
            );
            return Err(TransportError::UnknownSession {
                sid: msg.sid,
                kind: MessageKind::RegisterRs,
            });
        };

        // Refusals are never ACKed.
        if msg.code != CODE_OK {
            if session.is_established() {
                log::debug!(
                    "Session {} ignoring late REG_RS code {}",
                    msg.sid,
                    msg.code
                );
                return Ok(());
            }
            self.close_session(msg.sid);
            self.handler
                .on_session_create(msg.sid, SessionCode::from_wire(msg.code));
            return Err(TransportError::Rejected {
                sid: msg.sid,
                code: msg.code,
            });
        }

        session.send_ack(msg.seq)?;
        if session.on_register_rs(msg.seq) {
            log::info!("Session {} established", msg.sid);
            self.handler.on_session_create(msg.sid, SessionCode::Ok);
        }
        Ok(())
    }

    fn signal_delivery(&self) {
        // A full channel already holds a pending wake-up.
        let _ = self.wake_tx.try_send(());
    }

    pub fn retransmission_sweep(&self) {
        self.retransmission_sweep_at(Instant::now());
    }

    /// Runs one retransmission pass over every session. Give-ups are reported
    /// through [`SessionHandler::on_session_error`].
    pub fn retransmission_sweep_at(&self, now: Instant) {
        for session in self.snapshot() {
            for error in session.retransmission_check_at(now) {
                log::warn!("{}", error);
                self.handler.on_session_error(session.sid(), error);
            }
        }
    }

    /// Hands all in-order data of every session to the handler.
    pub fn drain_deliveries(&self) -> usize {
        let _delivery = lock(&self.delivery);
        self.snapshot()
            .iter()
            .map(|session| self.deliver_in_order(session))
            .sum()
    }

    pub fn timeout_sweep(&self) -> usize {
        self.timeout_sweep_at(Instant::now())
    }

    /// Force-delivers data stuck behind gaps older than the read timeout,
    /// followed by whatever becomes in-order after the skip.
    pub fn timeout_sweep_at(&self, now: Instant) -> usize {
        let _delivery = lock(&self.delivery);
        let mut delivered = 0;

        for session in self.snapshot() {
            loop {
                delivered += self.deliver_in_order(&session);
                let Some(data) = session.get_timeout_data(now) else {
                    break;
                };
                self.handler.on_recv(session.sid(), &data);
                delivered += 1;
            }
        }

        delivered
    }

    fn deliver_in_order(&self, session: &Session) -> usize {
        let mut delivered = 0;
        while let Some(data) = session.get_data() {
            self.handler.on_recv(session.sid(), &data);
            delivered += 1;
        }
        delivered
    }

    fn retransmission_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            thread::sleep(self.config.retransmission_period);
            self.retransmission_sweep();
        }
    }

    fn delivery_loop(&self, wake_rx: Receiver<()>) {
        while self.running.load(Ordering::SeqCst) {
            match wake_rx.recv_timeout(self.config.drain_period) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.drain_deliveries();
        }
    }

    fn timeout_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            thread::sleep(self.config.timeout_sweep_period);
            self.timeout_sweep();
        }
    }
}

fn check_seq(sid: i64, seq: i64, kind: MessageKind) -> TransportResult<()> {
    if is_valid_seq(seq) {
        Ok(())
    } else {
        Err(TransportError::SequenceOutOfRange { sid, seq, kind })
    }
}

impl DatagramReceiver for Engine {
    fn on_datagram(&self, data: &[u8], source: SocketAddr) {
        match self.receive_datagram(data, source) {
            Ok(()) => {}
            Err(
                e @ (TransportError::Framing { .. }
                | TransportError::Decode(_)
                | TransportError::SequenceOutOfRange { .. }),
            ) => {
                log::debug!("Dropping datagram from {}: {}", source, e);
            }
            Err(e) => log::warn!("Datagram from {}: {}", source, e),
        }
    }
}
