pub mod buffer;
pub mod engine;
pub mod error;
pub mod net;
pub mod protocol;
pub mod session;

pub use buffer::{PendingReceive, ReceiveBuffer, RetransmitReport, SendBuffer, SendEntry};
pub use engine::{Engine, EngineConfig, EngineEvent, EventQueue, SessionCode, SessionHandler};
pub use error::{TransportError, TransportResult};
pub use net::{
    DEFAULT_PORT, DatagramReceiver, DatagramSink, NetworkSimulator, NetworkStats,
    PacketLossSimulation, UdpTransport,
};
pub use protocol::{
    AckMsg, CODE_OK, CODE_SESSION_EXISTS, CodecError, DataMsg, Envelope, Framer, MessageKind,
    RegisterMsg, RegisterRsMsg, SEQ_MAX, STALE_MARGIN, is_stale, is_valid_seq, next_seq,
};
pub use session::{RetryBudget, Session, SessionConfig, SessionStats};

use std::sync::{Mutex, MutexGuard, PoisonError};

// Guarded state is consistent between statements, poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
