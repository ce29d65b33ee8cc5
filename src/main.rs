use clap::Parser;
use lanchat::{ChatError, Config, Engine, Notification, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "lanchat")]
#[command(about = "Serverless LAN chat with peer discovery and file transfer")]
#[command(version)]
struct Cli {
    /// Display name on the network (must be unique)
    #[arg(short, long)]
    name: String,
    /// UDP port to bind (0 picks an ephemeral port)
    #[arg(short, long, default_value = "6000")]
    port: u16,
    /// Bootstrap peer to contact on startup (host:port)
    #[arg(short, long)]
    connect: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    lanchat::utils::setup_logging();
    let cli = Cli::parse();

    let config = Config {
        name: cli.name,
        port: cli.port,
        ..Default::default()
    };
    let (engine, notifications) = Engine::start(config).await?;
    println!("listening on {}", engine.local_addr()?);

    if let Some(bootstrap) = cli.connect {
        let (host, port) = parse_endpoint(&bootstrap)?;
        engine.connect(host, port).await?;
    }

    tokio::spawn(print_notifications(notifications));
    run_shell(engine).await
}

/// Minimal line-oriented shell standing in for the original GUI. Plain
/// lines broadcast; slash commands drive the rest of the engine surface.
async fn run_shell(engine: Engine) -> Result<()> {
    println!("commands: /connect <host> <port>, /to <peer> <text>, /send <path> <peer>,");
    println!("          /accept <path> <peer>, /peers, /quit; anything else is broadcast");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let result = match parts.next() {
            Some("/quit") => break,
            Some("/peers") => {
                for peer in engine.peers().await {
                    println!("  {} @ {}:{}", peer.name, peer.ip, peer.port);
                }
                Ok(())
            }
            Some("/connect") => match (parts.next(), parts.next().and_then(|p| p.parse().ok())) {
                (Some(host), Some(port)) => engine.connect(host, port).await,
                _ => usage("/connect <host> <port>"),
            },
            Some("/to") => match parts.next() {
                Some(peer) => {
                    let text = parts.collect::<Vec<_>>().join(" ");
                    engine.send_message(&text, &[peer.to_string()]).await
                }
                None => usage("/to <peer> <text>"),
            },
            Some("/send") => match (parts.next(), parts.next()) {
                (Some(path), Some(peer)) => {
                    engine.request_upload(&PathBuf::from(path), peer).await
                }
                _ => usage("/send <path> <peer>"),
            },
            Some("/accept") => match (parts.next(), parts.next()) {
                (Some(path), Some(peer)) => {
                    engine.accept_download(&PathBuf::from(path), peer).await
                }
                _ => usage("/accept <path> <peer>"),
            },
            _ => engine.send_message(line, &[]).await,
        };
        if let Err(e) = result {
            println!("! {}", e);
        }
    }

    engine.leave().await
}

fn usage(hint: &str) -> Result<()> {
    println!("usage: {}", hint);
    Ok(())
}

fn parse_endpoint(endpoint: &str) -> Result<(&str, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ChatError::Config(format!("expected host:port, got {:?}", endpoint)))?;
    let port = port
        .parse()
        .map_err(|_| ChatError::Config(format!("bad port in {:?}", endpoint)))?;
    Ok((host, port))
}

async fn print_notifications(mut notifications: UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Chat { from, text, own } => {
                if own {
                    println!("(you) {}: {}", from, text);
                } else {
                    println!("{}: {}", from, text);
                }
            }
            Notification::PeerJoined { name } => println!("* {} joined", name),
            Notification::PeerRemoved { name } => println!("* {} left", name),
            Notification::UploadOffer {
                peer,
                filename,
                size,
            } => println!(
                "* {} offers {} ({} bytes); /accept <path> {} to receive",
                peer, filename, size, peer
            ),
            Notification::DestinationBusy { peer } => {
                println!("* a transfer to {} is already pending", peer)
            }
            Notification::TransferComplete { peer, path, bytes } => {
                println!("* transfer with {} complete: {:?} ({} bytes)", peer, path, bytes)
            }
            Notification::TransferFailed { peer, reason } => {
                println!("* transfer with {} failed: {}", peer, reason)
            }
        }
    }
}
