//! Microphone Sender Application
//!
//! Captures the microphone and streams raw PCM buffers over UDP.
//!
//! Usage: `sender [config.toml] [--synthetic]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mic_relay::{
    audio::{device::list_input_devices, CpalBackend, SyntheticBackend},
    config::AppConfig,
    CaptureSession,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting LAN Mic Sender");

    let mut config_path: Option<PathBuf> = None;
    let mut synthetic = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--synthetic" => synthetic = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }

    let config = match &config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_or_default()?,
    };

    // List available devices
    println!("\n=== Available Input Devices ===");
    for device in list_input_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let mut session = if synthetic {
        CaptureSession::start(&config.session, &mut SyntheticBackend::default())?
    } else {
        let mut backend = CpalBackend::new(config.session.device_id.clone());
        CaptureSession::start(&config.session, &mut backend)?
    };

    tracing::info!(
        "Streaming from {} - press Ctrl+C to stop",
        session.local_addr()
    );

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = stats_tick.tick() => {
                if !session.is_running() {
                    tracing::warn!("Network loop exited");
                    break;
                }
                let stats = session.stats();
                tracing::info!(
                    "Stats: {} captured, {} sent, {:.1} KB sent, {} dropped, {} overrun samples",
                    stats.buffers_captured,
                    stats.buffers_sent,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.buffers_dropped,
                    stats.overrun_samples
                );
            }
        }
    }

    session.stop()?;
    Ok(())
}
