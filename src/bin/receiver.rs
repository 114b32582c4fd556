//! Microphone Relay Application
//!
//! Receives raw PCM datagrams and feeds them to a local PulseAudio pipe
//! source (or standard output), pinging the sender while the link is quiet.
//!
//! Usage: `receiver <udp_port> [--stdout] [--config <path>]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mic_relay::{
    config::{AppConfig, SinkConfig},
    network::ReceiveRelay,
    sink::{self, LocalSink},
};

fn usage() -> ! {
    eprintln!("Usage: receiver <udp_port> [--stdout] [--config <path>]");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout may carry audio
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut port: Option<u16> = None;
    let mut to_stdout = false;
    let mut config_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdout" => to_stdout = true,
            "--config" => config_path = Some(args.next().map(PathBuf::from).unwrap_or_else(|| usage())),
            _ => match arg.parse::<u16>() {
                Ok(p) if p != 0 => port = Some(p),
                _ => usage(),
            },
        }
    }
    let Some(port) = port else { usage() };

    let mut config = match &config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_or_default()?,
    };
    config.relay.heartbeat_target.set_port(port);
    if to_stdout {
        config.relay.sink = SinkConfig::Stdout;
    }

    tracing::info!("Starting LAN Mic Relay, sender port {}", port);

    // Binds before attaching, so a busy port leaves no pipe source behind
    let mut relay = ReceiveRelay::bind(&config.relay, sink::from_config(&config.relay.sink))
        .context("failed to start relay")?;

    let result = relay
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Interrupted, shutting down");
        })
        .await;

    let mut sink = relay.into_sink();
    if let Err(e) = sink.detach() {
        tracing::error!("{}", e);
    }

    result?;
    Ok(())
}
