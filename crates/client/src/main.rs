mod client;
mod config;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use client::RudpClient;
use config::ClientConfig;
use rudp::{EngineConfig, PacketLossSimulation, RetryBudget, SessionConfig};

#[derive(Parser)]
#[command(name = "rudp-client")]
#[command(about = "Streams numbered payloads over a reliable UDP session")]
struct Args {
    #[arg(
        short,
        long,
        default_value_t = SocketAddr::from(([127, 0, 0, 1], rudp::DEFAULT_PORT)),
        help = "Server address"
    )]
    server: SocketAddr,

    #[arg(long, help = "Also accept sessions on this address, e.g. 0.0.0.0:8009")]
    listen: Option<String>,

    #[arg(long, default_value_t = 20, help = "Milliseconds between payloads")]
    interval: u64,

    #[arg(long, default_value_t = 1000)]
    start_index: u64,

    #[arg(short, long, help = "Stop after this many payloads")]
    count: Option<u64>,

    #[arg(
        long,
        default_value_t = -1,
        allow_hyphen_values = true,
        help = "Retransmissions per message (-1 unlimited, 0 disabled)"
    )]
    max_retransmissions: i64,

    #[arg(
        long,
        default_value_t = rudp::session::DEFAULT_RETRANSMISSION_INTERVAL_MS,
        help = "Retransmission interval in ms"
    )]
    retransmission_interval: u64,

    #[arg(
        long,
        default_value_t = rudp::session::DEFAULT_READ_TIMEOUT_MS,
        help = "Gap timeout in ms"
    )]
    read_timeout: u64,

    #[arg(long, default_value_t = 5, help = "Seconds between stats reports")]
    stats_interval: u64,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let packet_loss = if args.simulate_packet_loss {
        Some(PacketLossSimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        })
    } else {
        None
    };

    let config = ClientConfig {
        engine: EngineConfig {
            session: SessionConfig {
                retry: RetryBudget::from_count(args.max_retransmissions),
                retransmission_interval: Duration::from_millis(args.retransmission_interval),
                read_timeout: Duration::from_millis(args.read_timeout),
            },
            ..Default::default()
        },
        send_interval: Duration::from_millis(args.interval),
        start_index: args.start_index,
        count: args.count,
        stats_interval: Duration::from_secs(args.stats_interval),
        packet_loss,
        ..Default::default()
    };

    let mut client = RudpClient::new(args.server, args.listen.as_deref(), config)?;
    if let Some(addr) = client.local_addr() {
        log::info!("Client bound to {}", addr);
    }

    let result = client.connect(args.server).and_then(|_| client.run());
    if result.is_ok() && !client.flush(Duration::from_secs(5)) {
        log::warn!("Some payloads were never acknowledged");
    }

    client.shutdown();
    result
}
