use clap::Parser;
use log::{debug, error, info};
use server::config::ServerConfig;
use server::error::ServerError;
use server::network::Server;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value_t = shared::MAX_SESSIONS)]
    max_sessions: usize,

    /// Inactivity in milliseconds before a session is evicted
    #[arg(short, long, default_value_t = shared::IDLE_TIMEOUT_MS)]
    idle_timeout_ms: u64,

    /// Pause between loop iterations in milliseconds
    #[arg(short, long, default_value = "1")]
    tick_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            max_sessions: args.max_sessions,
            idle_timeout: Duration::from_millis(args.idle_timeout_ms),
            tick: Duration::from_millis(args.tick_ms.max(1)),
            ..ServerConfig::default()
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = run(args.into()) {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Runs the server on a single-threaded runtime until Ctrl+C
fn run(config: ServerConfig) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Init)?;

    runtime.block_on(async {
        let (server, mut events) = Server::bind(config).await?;
        let handle = server.handle();

        // No display is attached to the headless binary
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!("{:?}", event);
            }
        });

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.shutdown();
            }
        });

        server.run().await
    })
}
