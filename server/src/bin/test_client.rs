use clap::Parser;
use log::{info, warn};
use shared::{move_message, parse_session_id, shot_message, DISCONNECT_TAG, MAX_MESSAGE_SIZE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted client for exercising the relay server")]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:1234")]
    server: String,

    /// Number of move messages to send
    #[arg(short, long, default_value = "10")]
    moves: u32,

    /// Session id to shoot at after moving
    #[arg(short, long)]
    target: Option<u64>,
}

/// Logs whatever the server sent within `wait`
async fn drain(stream: &mut TcpStream, buf: &mut [u8], wait: Duration) -> std::io::Result<bool> {
    match timeout(wait, stream.read(buf)).await {
        Ok(Ok(0)) => {
            info!("Server closed the connection");
            Ok(false)
        }
        Ok(Ok(len)) => {
            info!("Received: {:?}", String::from_utf8_lossy(&buf[..len]));
            Ok(true)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(true),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);

    let mut buf = [0u8; MAX_MESSAGE_SIZE];

    let len = timeout(Duration::from_secs(5), stream.read(&mut buf)).await??;
    match parse_session_id(&buf[..len]) {
        Some(id) => info!("Admitted as session {}", id),
        None => {
            warn!("Server refused the connection");
            return Ok(());
        }
    }

    for _ in 0..args.moves {
        stream.write_all(&move_message()).await?;
        if !drain(&mut stream, &mut buf, Duration::from_secs(1)).await? {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }

    if let Some(target) = args.target {
        info!("Shooting at session {}", target);
        stream.write_all(&shot_message(target)).await?;
        drain(&mut stream, &mut buf, Duration::from_millis(500)).await?;
    }

    info!("Sending disconnect");
    stream.write_all(DISCONNECT_TAG.to_string().as_bytes()).await?;
    stream.shutdown().await?;

    info!("Test client finished");
    Ok(())
}
