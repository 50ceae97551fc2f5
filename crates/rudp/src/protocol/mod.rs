mod framing;
mod message;

pub use framing::{DEFAULT_PREFIX, DEFAULT_SUFFIX, Framer};
pub use message::{
    AckMsg, CODE_OK, CODE_SESSION_EXISTS, CodecError, DataMsg, Envelope, MessageKind,
    RegisterMsg, RegisterRsMsg, SEQ_MAX, STALE_MARGIN, is_stale, is_valid_seq, next_seq,
};
