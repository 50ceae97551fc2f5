/// Leading marker of every datagram.
pub const DEFAULT_PREFIX: &[u8] = &[0x31, 0x31, 0x31];
/// Trailing marker of every datagram.
pub const DEFAULT_SUFFIX: &[u8] = &[0x32, 0x32, 0x32, 0x0A];

/// Wraps encoded envelopes in fixed marker bytes so stray UDP traffic can be
/// rejected before any decoding is attempted.
///
/// This is a validity marker, not encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framer {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_SUFFIX)
    }
}

impl Framer {
    pub fn new(prefix: &[u8], suffix: &[u8]) -> Self {
        Self {
            prefix: prefix.to_vec(),
            suffix: suffix.to_vec(),
        }
    }

    /// Combined length of both markers; the shortest datagram `validate` accepts.
    pub fn overhead(&self) -> usize {
        self.prefix.len() + self.suffix.len()
    }

    pub fn wrap(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(payload.len() + self.overhead());
        framed.extend_from_slice(&self.prefix);
        framed.extend_from_slice(payload);
        framed.extend_from_slice(&self.suffix);
        framed
    }

    pub fn validate(&self, datagram: &[u8]) -> bool {
        if datagram.len() < self.overhead() {
            log::debug!("Datagram too short: {} bytes", datagram.len());
            return false;
        }

        let head = &datagram[..self.prefix.len()];
        let tail = &datagram[datagram.len() - self.suffix.len()..];
        if head != self.prefix.as_slice() || tail != self.suffix.as_slice() {
            log::debug!("Datagram markers mismatch: head={:?} tail={:?}", head, tail);
            return false;
        }

        true
    }

    /// Strips both markers. The datagram must have passed `validate`.
    pub fn unwrap<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        &datagram[self.prefix.len()..datagram.len() - self.suffix.len()]
    }
}
