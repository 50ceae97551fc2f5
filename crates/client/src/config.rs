use std::time::Duration;

use rudp::{EngineConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub engine: EngineConfig,
    pub send_interval: Duration,
    /// Number carried by the first `index=N` payload.
    pub start_index: u64,
    /// Stop after this many payloads; unbounded when `None`.
    pub count: Option<u64>,
    pub handshake_timeout: Duration,
    pub stats_interval: Duration,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            send_interval: Duration::from_millis(20),
            start_index: 1000,
            count: None,
            handshake_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(5),
            packet_loss: None,
        }
    }
}
