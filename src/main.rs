use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tuner_relay::{
    catalog::ChannelCatalog,
    config::Config,
    events::EventBus,
    hwaccel::{HwAccelService, check_ffmpeg_availability},
    models::ChannelInfo,
    profiles::ProfileCatalog,
    services::{FfmpegLauncher, StateSnapshotter, StreamSupervisor, ThroughputMonitor},
};

#[derive(Parser)]
#[command(name = "tuner-relay")]
#[command(version)]
#[command(about = "Personal IPTV relay: per-channel FFmpeg stream orchestration")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// JSON file with the imported channel list
    #[arg(long, value_name = "FILE")]
    channels: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = format!("tuner_relay={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tuner-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from specified file
    let config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    match check_ffmpeg_availability(&config.streaming.ffmpeg_command).await {
        (true, version) => info!(
            "FFmpeg available: {}",
            version.unwrap_or_else(|| "unknown version".to_string())
        ),
        (false, _) => warn!(
            "FFmpeg '{}' is not usable; stream starts will fail",
            config.streaming.ffmpeg_command
        ),
    }

    let events = EventBus::new();
    let catalog = Arc::new(ChannelCatalog::new(events.clone()));
    let hwaccel = Arc::new(HwAccelService::new(config.streaming.ffmpeg_command.clone()));
    hwaccel.refresh().await;

    let profiles = ProfileCatalog::from_config(&config.transcoding);
    let launcher = Arc::new(FfmpegLauncher::new(config.streaming.ffmpeg_command.clone()));
    let snapshotter = StateSnapshotter::new(&config.streaming.state_file);
    let supervisor = StreamSupervisor::new(
        config.streaming.clone(),
        profiles,
        catalog.clone(),
        hwaccel,
        launcher,
        snapshotter.clone(),
        events.clone(),
    );

    if let Some(channels_file) = &cli.channels {
        let contents = tokio::fs::read_to_string(channels_file).await?;
        let imported: Vec<ChannelInfo> = serde_json::from_str(&contents)?;
        info!("Imported {} channels from {}", imported.len(), channels_file);
        supervisor.refresh_catalog(imported).await;
    }

    // Bring persisted streams back before accepting new work
    snapshotter.restore(&supervisor).await;

    let monitor = ThroughputMonitor::spawn(
        supervisor.clone(),
        config.streaming.throughput_interval(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping streams");
    monitor.shutdown().await;
    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
