use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::error::TransportError;
use crate::lock;
use crate::protocol::CODE_OK;

/// Outcome of a handshake as reported to the initiating application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCode {
    Ok,
    Error,
}

impl SessionCode {
    pub fn from_wire(code: i64) -> Self {
        if code == CODE_OK {
            SessionCode::Ok
        } else {
            SessionCode::Error
        }
    }
}

/// Callbacks from the engine into the embedding application.
///
/// Invoked from the engine's dispatch and background threads, never while the
/// session table is locked. Delivery callbacks must not call back into
/// [`Engine::drain_deliveries`](super::Engine::drain_deliveries) or the
/// timeout sweep.
pub trait SessionHandler: Send + Sync {
    /// Fired once per handshake on the initiating side.
    fn on_session_create(&self, sid: i64, code: SessionCode);

    /// Fired once per delivered payload, in sequence order.
    fn on_recv(&self, sid: i64, data: &[u8]);

    fn on_session_error(&self, sid: i64, error: TransportError);

    /// A peer registered a new session with us.
    fn on_session_accept(&self, _sid: i64, _peer: SocketAddr) {}
}

#[derive(Debug)]
pub enum EngineEvent {
    SessionCreated { sid: i64, code: SessionCode },
    SessionAccepted { sid: i64, peer: SocketAddr },
    Received { sid: i64, data: Vec<u8> },
    SessionError { sid: i64, error: TransportError },
}

/// Handler that queues every callback for the owner to drain later.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<EngineEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        lock(&self.events).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    fn push(&self, event: EngineEvent) {
        lock(&self.events).push_back(event);
    }
}

impl SessionHandler for EventQueue {
    fn on_session_create(&self, sid: i64, code: SessionCode) {
        self.push(EngineEvent::SessionCreated { sid, code });
    }

    fn on_recv(&self, sid: i64, data: &[u8]) {
        self.push(EngineEvent::Received {
            sid,
            data: data.to_vec(),
        });
    }

    fn on_session_error(&self, sid: i64, error: TransportError) {
        self.push(EngineEvent::SessionError { sid, error });
    }

    fn on_session_accept(&self, sid: i64, peer: SocketAddr) {
        self.push(EngineEvent::SessionAccepted { sid, peer });
    }
}
