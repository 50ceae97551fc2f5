mod config;
mod server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use rudp::{EngineConfig, PacketLossSimulation, RetryBudget, SessionConfig};
use server::RudpServer;

#[derive(Parser)]
#[command(name = "rudp-server")]
#[command(about = "Reliable UDP session server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = rudp::DEFAULT_PORT)]
    port: u16,

    #[arg(long, help = "Send received payloads back to the sender")]
    echo: bool,

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

    #[arg(long, help = "Enable global packet loss simulation")]
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
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let global_packet_loss = if args.simulate_packet_loss {
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

    let config = ServerConfig {
        engine: EngineConfig {
            session: SessionConfig {
                retry: RetryBudget::from_count(args.max_retransmissions),
                retransmission_interval: Duration::from_millis(args.retransmission_interval),
                read_timeout: Duration::from_millis(args.read_timeout),
            },
            ..Default::default()
        },
        echo: args.echo,
        stats_interval: Duration::from_secs(args.stats_interval),
        global_packet_loss,
    };

    let mut server = RudpServer::new(&bind_addr, config)?;
    if let Some(addr) = server.local_addr() {
        log::info!("Server started on {}", addr);
    }

    server.run();
    log::info!("Server shutting down");
    Ok(())
}
