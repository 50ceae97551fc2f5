use rkyv::{Archive, Deserialize, Serialize, rancor, util::AlignedVec};

/// Sequence numbers live in `0..SEQ_MAX` and wrap to zero.
pub const SEQ_MAX: i64 = 1 << 20;
/// A sequence behind the next expected one by less than
/// `SEQ_MAX - STALE_MARGIN` is treated as already delivered.
pub const STALE_MARGIN: i64 = 3000;

pub const CODE_OK: i64 = 0;
pub const CODE_SESSION_EXISTS: i64 = 10001;

/// Successor of `seq`, always in `0..SEQ_MAX`.
#[inline]
pub fn next_seq(seq: i64) -> i64 {
    (seq.rem_euclid(SEQ_MAX) + 1) % SEQ_MAX
}

#[inline]
pub fn is_valid_seq(seq: i64) -> bool {
    (0..SEQ_MAX).contains(&seq)
}

/// True when `seq` is an old sequence relative to `expected` rather than one
/// that has wrapped around and is legitimately ahead.
#[inline]
pub fn is_stale(seq: i64, expected: i64) -> bool {
    seq < expected && expected - seq < SEQ_MAX - STALE_MARGIN
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

// Framed payloads start at an arbitrary offset, validation needs alignment.
fn aligned(data: &[u8]) -> AlignedVec<16> {
    let mut buf = AlignedVec::<16>::with_capacity(data.len());
    buf.extend_from_slice(data);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum MessageKind {
    Register,
    RegisterRs,
    Data,
    Ack,
}

impl MessageKind {
    /// ACKs are fire-and-forget, everything else is held for retransmission.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, MessageKind::Ack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Register => "REG",
            MessageKind::RegisterRs => "REG_RS",
            MessageKind::Data => "DATA",
            MessageKind::Ack => "ACK",
        }
    }
}

/// Outer wire record: a type tag and the type-specific payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.into_vec())
            .map_err(CodecError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(data)).map_err(CodecError::Deserialize)
    }

    /// Encodes `payload` under the given type tag.
    pub fn encode(payload: &[u8], kind: MessageKind) -> Result<Vec<u8>, CodecError> {
        Self::new(kind, payload.to_vec()).serialize()
    }

    pub fn decode(data: &[u8]) -> Result<(MessageKind, Vec<u8>), CodecError> {
        let envelope = Self::deserialize(data)?;
        Ok((envelope.kind, envelope.payload))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct RegisterMsg {
    pub seq: i64,
    pub sid: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct RegisterRsMsg {
    pub seq: i64,
    pub sid: i64,
    pub code: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct AckMsg {
    pub seq: i64,
    pub sid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DataMsg {
    pub seq: i64,
    pub sid: i64,
    pub data: Vec<u8>,
}

macro_rules! payload_codec {
    ($($ty:ident => $kind:ident),* $(,)?) => {
        $(
            impl $ty {
                pub const KIND: MessageKind = MessageKind::$kind;

                pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
                    rkyv::to_bytes::<rancor::Error>(self)
                        .map(|bytes| bytes.into_vec())
                        .map_err(CodecError::Serialize)
                }

                pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
                    rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
                        .map_err(CodecError::Deserialize)
                }

                /// Serializes the record and wraps it in its envelope.
                pub fn to_envelope(&self) -> Result<Vec<u8>, CodecError> {
                    Envelope::encode(&self.serialize()?, Self::KIND)
                }
            }
        )*
    };
}

payload_codec! {
    RegisterMsg => Register,
    RegisterRsMsg => RegisterRs,
    DataMsg => Data,
    AckMsg => Ack,
}
