use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig, ServerMessage};
use server::session::{SessionConfig, TIMEOUT_TICKS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "25565")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Ticks without traffic before a keepalive is sent
    #[arg(long, default_value_t = TIMEOUT_TICKS)]
    timeout_ticks: u32,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "32")]
    max_sessions: usize,

    /// Name of the world players join
    #[arg(short, long, default_value = "world")]
    world: String,

    /// Message shown in server list pings
    #[arg(long, default_value = "A Rust game server")]
    motd: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_rate = args.tick_rate.max(1);

    let config = ServerConfig {
        bind_address: format!("{}:{}", args.host, args.port),
        tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
        max_sessions: args.max_sessions,
        world_name: args.world,
        motd: args.motd,
        session: SessionConfig {
            timeout_ticks: args.timeout_ticks.max(1),
        },
    };

    info!(
        "Starting server at {} ({} ticks/s, timeout after {} ticks)",
        config.bind_address, tick_rate, config.session.timeout_ticks
    );

    let mut server = Server::bind(config).await?;

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
