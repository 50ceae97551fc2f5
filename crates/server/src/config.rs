use std::time::Duration;

use rudp::{EngineConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    /// Sends every received payload back on the same session.
    pub echo: bool,
    pub stats_interval: Duration,
    pub global_packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            echo: false,
            stats_interval: Duration::from_secs(5),
            global_packet_loss: None,
        }
    }
}
