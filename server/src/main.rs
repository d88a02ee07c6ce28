mod http;
mod provider;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gifstream_core::{Bounds, FrameSource, Shutdown, StreamConfig};

use crate::provider::RandomColumns;

#[derive(Parser)]
#[command(name = "gifstream-serve", about = "Serve a never-ending animated GIF over HTTP")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9999")]
    listen: SocketAddr,

    /// Image width in pixels
    #[arg(long, default_value_t = 500)]
    width: u16,

    /// Image height in pixels
    #[arg(long, default_value_t = 500)]
    height: u16,

    /// Number of palette colors (1-256)
    #[arg(long, default_value_t = 3)]
    colors: usize,

    /// Display time of each frame, in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    /// Interval between new frames, in milliseconds
    #[arg(long, default_value_t = 1000)]
    refresh_ms: u64,

    /// Seed for the random palette and columns
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let bounds = Bounds::sized(cli.width, cli.height).context("invalid image size")?;
    let producer = RandomColumns::new(bounds, cli.colors, cli.seed).context("invalid palette size")?;
    log::debug!("palette: {:?}", producer.palette().colors());

    let shutdown = Shutdown::new();
    let source = FrameSource::with_shutdown(producer, Duration::from_millis(cli.refresh_ms), shutdown.clone());
    source.start();

    let state = http::AppState {
        source,
        config: StreamConfig {
            delay: Duration::from_millis(cli.delay_ms),
        },
        shutdown,
    };

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    log::info!("serving {}x{} stream on http://{}", cli.width, cli.height, cli.listen);

    http::serve(listener, state, http::shutdown_signal()).await?;
    log::info!("server stopped");
    Ok(())
}
