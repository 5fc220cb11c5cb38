use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use uniroute_shared::protocol::Frame;

mod config;
mod proxy;
mod tunnel;

use config::UnirouteConfig;

#[derive(Parser)]
#[command(name = "uniroute-client")]
#[command(author = "uniroute contributors")]
#[command(version = "0.1.0")]
#[command(about = "Tunnel client: exposes a local HTTP service through a uniroute relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay control endpoint
    #[arg(short, long, default_value = "ws://localhost:8080/tunnel")]
    relay: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose a local HTTP service
    Http {
        /// Local port to expose
        port: u16,

        /// Custom subdomain
        #[arg(short, long)]
        subdomain: Option<String>,

        /// Authentication token
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Start a tunnel from a config file (uniroute.yml)
    Start {
        /// Path to config file (default: auto-detect)
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Http { port, subdomain, token } => {
            run_tunnel(&cli.relay, "127.0.0.1", port, subdomain, token).await?;
        }
        Commands::Start { config: config_path } => {
            let path = match config_path {
                Some(p) => PathBuf::from(p),
                None => UnirouteConfig::find_config()
                    .ok_or_else(|| anyhow::anyhow!("no config file found; create uniroute.yml or pass --config"))?,
            };
            let cfg = UnirouteConfig::load(&path)?;
            info!("loaded config from {}", path.display());
            run_tunnel(&cfg.relay, &cfg.local_host, cfg.local_port, cfg.subdomain, cfg.auth_token).await?;
        }
    }

    Ok(())
}

/// Connect to the relay, complete the `init`/`tunnel_created` handshake,
/// then loop forwarding `request` frames to the local origin until the
/// connection closes or the operator hits ctrl-c.
async fn run_tunnel(
    relay_url: &str,
    local_host: &str,
    local_port: u16,
    subdomain: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let connect_url = match &subdomain {
        Some(s) => format!("{relay_url}?subdomain={s}"),
        None => relay_url.to_string(),
    };

    info!("connecting to relay: {}", connect_url);
    let (ws_stream, _) = connect_async(&connect_url)
        .await
        .context("failed to connect to relay server")?;
    let (mut write, mut read) = ws_stream.split();

    let init = Frame::Init {
        version: "1.0".to_string(),
        local_url: format!("http://{local_host}:{local_port}"),
        token,
    };
    write
        .send(Message::Text(init.encode()?.into()))
        .await
        .context("failed to send init frame")?;

    let tunnel_id;
    let public_url;
    match read.next().await {
        Some(Ok(Message::Text(text))) => match Frame::decode(&text)? {
            Frame::TunnelCreated {
                tunnel_id: id,
                public_url: url,
                ..
            } => {
                tunnel_id = id;
                public_url = url;
            }
            Frame::Error { code, message, .. } => {
                anyhow::bail!("relay rejected the tunnel: {code} - {message}");
            }
            other => anyhow::bail!("unexpected frame during handshake: {other:?}"),
        },
        _ => anyhow::bail!("relay closed the connection during handshake"),
    }

    println!("tunnel active: {public_url} -> http://{local_host}:{local_port}");
    println!("press ctrl-c to stop\n");
    info!(%tunnel_id, %public_url, "tunnel active");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(&text) {
                            Ok(frame @ Frame::Request { .. }) => {
                                let tx = outbound_tx.clone();
                                let host = local_host.to_string();
                                tokio::spawn(async move {
                                    let response = tunnel::handle_request(&host, local_port, frame).await;
                                    if let Ok(text) = response.encode() {
                                        let _ = tx.send(Message::Text(text.into())).await;
                                    }
                                });
                            }
                            Ok(Frame::Ping) => {
                                let _ = outbound_tx.send(Message::Text(Frame::Pong.encode()?.into())).await;
                            }
                            Ok(Frame::Pong) => {}
                            Ok(other) => {
                                warn!("unexpected frame from relay: {other:?}");
                            }
                            Err(e) => {
                                warn!("failed to decode frame from relay: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = outbound_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("relay closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = outbound_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    drop(outbound_tx);
    let _ = writer.await;
    Ok(())
}
