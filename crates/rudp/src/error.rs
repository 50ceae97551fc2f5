use crate::protocol::{CodecError, MessageKind};

pub type TransportResult<T> = Result<T, TransportError>;

/// Per-packet and per-session failures. None of them stop the engine.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("datagram of {len} bytes failed marker validation")]
    Framing { len: usize },
    #[error("malformed message: {0}")]
    Decode(#[from] CodecError),
    #[error("{} for session {sid} carries sequence {seq} outside the window", kind.as_str())]
    SequenceOutOfRange { sid: i64, seq: i64, kind: MessageKind },
    #[error("{} for unknown session {sid}", kind.as_str())]
    UnknownSession { sid: i64, kind: MessageKind },
    #[error("session {sid} is already registered")]
    SessionExists { sid: i64 },
    #[error("session {sid} rejected by peer with code {code}")]
    Rejected { sid: i64, code: i64 },
    #[error("session {sid} gave up on sequence {seq} after exhausting its retry budget")]
    DeliveryGiveUp { sid: i64, seq: i64 },
}

impl TransportError {
    pub fn sid(&self) -> Option<i64> {
        match self {
            TransportError::UnknownSession { sid, .. }
            | TransportError::SequenceOutOfRange { sid, .. }
            | TransportError::SessionExists { sid }
            | TransportError::Rejected { sid, .. }
            | TransportError::DeliveryGiveUp { sid, .. } => Some(*sid),
            TransportError::Framing { .. } | TransportError::Decode(_) => None,
        }
    }
}
