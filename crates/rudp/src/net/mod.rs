mod simulator;
mod socket;
mod stats;

use std::net::SocketAddr;

pub use simulator::NetworkSimulator;
pub use socket::{DEFAULT_PORT, MAX_DATAGRAM_SIZE, UdpTransport};
pub use stats::{NetworkStats, PacketLossSimulation};

/// Outbound half of the socket as seen by sessions.
pub trait DatagramSink: Send + Sync {
    /// Best-effort send through the outbound queue.
    fn send_datagram(&self, data: Vec<u8>, dest: SocketAddr);

    /// Sends right away, bypassing the outbound queue. Used for retransmissions.
    fn send_immediate(&self, data: &[u8], dest: SocketAddr);
}

/// Inbound callback registered with the socket.
pub trait DatagramReceiver: Send + Sync {
    fn on_datagram(&self, data: &[u8], source: SocketAddr);
}
