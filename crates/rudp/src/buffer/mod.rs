mod receive;
mod send;

pub use receive::{PendingReceive, ReceiveBuffer};
pub use send::{RetransmitReport, SendBuffer, SendEntry};
