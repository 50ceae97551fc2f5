use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use rudp::{Engine, EngineEvent, EventQueue, SessionCode};

use crate::config::ClientConfig;

/// Opens one session to a server and streams numbered payloads over it.
pub struct RudpClient {
    engine: Arc<Engine>,
    events: Arc<EventQueue>,
    config: ClientConfig,
    sid: Option<i64>,
}

impl RudpClient {
    /// Listens on `listen_addr` when given, so the process can accept
    /// sessions too; otherwise binds an ephemeral port towards `server`.
    pub fn new(
        server: SocketAddr,
        listen_addr: Option<&str>,
        config: ClientConfig,
    ) -> Result<Self> {
        let events = Arc::new(EventQueue::new());
        let engine = match listen_addr {
            Some(addr) => Engine::listen(addr, config.engine.clone(), events.clone()),
            None => Engine::dial(server, config.engine.clone(), events.clone()),
        }
        .context("failed to open socket")?;

        if let (Some(sim), Some(transport)) = (&config.packet_loss, engine.transport()) {
            transport.set_loss_simulation(sim.clone());
        }

        Ok(Self {
            engine,
            events,
            config,
            sid: None,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.local_addr()
    }

    /// Runs the handshake and waits for its outcome.
    pub fn connect(&mut self, server: SocketAddr) -> Result<i64> {
        let sid = self.engine.create_session(server)?;
        log::info!("Registering session {} with {}", sid, server);

        let deadline = Instant::now() + self.config.handshake_timeout;
        while Instant::now() < deadline {
            for event in self.events.drain() {
                match event {
                    EngineEvent::SessionCreated { sid: created, code } if created == sid => {
                        if code == SessionCode::Error {
                            bail!("server refused session {}", sid);
                        }
                        self.sid = Some(sid);
                        return Ok(sid);
                    }
                    other => self.handle_event(other),
                }
            }
            thread::sleep(Duration::from_millis(5));
        }

        self.engine.close_session(sid);
        bail!("no answer from {} within {:?}", server, self.config.handshake_timeout)
    }

    pub fn run(&mut self) -> Result<()> {
        let sid = self.sid.context("not connected")?;
        let mut index = self.config.start_index;
        let mut sent = 0u64;
        let mut last_stats = Instant::now();

        while self.engine.running().load(std::sync::atomic::Ordering::SeqCst) {
            if self.config.count.is_some_and(|count| sent >= count) {
                break;
            }

            let payload = format!("index={}", index);
            self.engine.send_data(sid, payload.as_bytes())?;
            index += 1;
            sent += 1;

            for event in self.events.drain() {
                self.handle_event(event);
            }

            if last_stats.elapsed() >= self.config.stats_interval {
                last_stats = Instant::now();
                self.log_stats();
            }

            thread::sleep(self.config.send_interval);
        }

        self.log_stats();
        Ok(())
    }

    /// Waits until every sent payload is acknowledged or `timeout` passes.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(session) = self.sid.and_then(|sid| self.engine.session(sid)) else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if session.send_buffer().is_empty() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }

    fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Received { sid, data } => {
                log::info!("Session {} received {} bytes", sid, data.len());
            }
            EngineEvent::SessionAccepted { sid, peer } => {
                log::info!("Session {} accepted from {}", sid, peer);
            }
            EngineEvent::SessionCreated { sid, code } => {
                log::info!("Session {} created: {:?}", sid, code);
            }
            EngineEvent::SessionError { sid, error } => {
                log::warn!("Session {}: {}", sid, error);
            }
        }
    }

    fn log_stats(&self) {
        for stats in self.engine.stats() {
            log::info!(
                "Session {}: sent={} resent={} acked={} abandoned={} outstanding={} loss={:.1}% retrans={:.1}%",
                stats.sid,
                stats.sent,
                stats.retransmitted,
                stats.acked,
                stats.abandoned,
                stats.outstanding,
                stats.loss_rate(),
                stats.retransmission_rate()
            );
        }
    }
}
