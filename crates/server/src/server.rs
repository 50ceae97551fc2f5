use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rudp::{Engine, EngineEvent, EventQueue, SessionCode};

use crate::config::ServerConfig;

/// Accepts sessions and logs what arrives on them.
pub struct RudpServer {
    engine: Arc<Engine>,
    events: Arc<EventQueue>,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    last_stats: Instant,
}

impl RudpServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let events = Arc::new(EventQueue::new());
        let engine = Engine::listen(bind_addr, config.engine.clone(), events.clone())?;

        if let (Some(sim), Some(transport)) = (&config.global_packet_loss, engine.transport()) {
            transport.set_loss_simulation(sim.clone());
        }

        Ok(Self {
            running: engine.running(),
            engine,
            events,
            config,
            last_stats: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.local_addr()
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(10));
        }
        self.engine.shutdown();
    }

    pub fn tick_once(&mut self) {
        for event in self.events.drain() {
            self.handle_event(event);
        }

        if self.last_stats.elapsed() >= self.config.stats_interval {
            self.last_stats = Instant::now();
            self.log_stats();
        }
    }

    fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::SessionAccepted { sid, peer } => {
                log::info!("Session {} accepted from {}", sid, peer);
            }
            EngineEvent::SessionCreated { sid, code } => match code {
                SessionCode::Ok => log::info!("Session {} created", sid),
                SessionCode::Error => log::warn!("Session {} refused by peer", sid),
            },
            EngineEvent::Received { sid, data } => {
                log::debug!(
                    "Session {} received {} bytes: {}",
                    sid,
                    data.len(),
                    String::from_utf8_lossy(&data)
                );
                if self.config.echo {
                    if let Err(e) = self.engine.send_data(sid, &data) {
                        log::warn!("Echo on session {} failed: {}", sid, e);
                    }
                }
            }
            EngineEvent::SessionError { sid, error } => {
                log::warn!("Session {}: {}", sid, error);
            }
        }
    }

    fn log_stats(&self) {
        for stats in self.engine.stats() {
            log::info!(
                "Session {}: sent={} resent={} acked={} delivered={} outstanding={} loss={:.1}% retrans={:.1}%",
                stats.sid,
                stats.sent,
                stats.retransmitted,
                stats.acked,
                stats.delivered,
                stats.outstanding,
                stats.loss_rate(),
                stats.retransmission_rate()
            );
        }

        if let Some(transport) = self.engine.transport() {
            let net = transport.stats();
            log::info!(
                "Socket: {} datagrams out, {} in, {} dropped by simulation",
                net.datagrams_sent,
                net.datagrams_received,
                net.simulated_drops
            );
        }
    }
}
