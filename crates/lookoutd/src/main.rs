use anyhow::{Context, Result};
use clap::Parser;
use lookout_hw::{open_source, CameraSpec};
use lookoutd::{router, AppState, Config};
use std::future::IntoFuture;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookoutd", about = "Lookout MJPEG stream server")]
struct Args {
    /// TOML config file (default: $LOOKOUT_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera: device index, device path or MJPEG stream URL
    #[arg(long)]
    camera: Option<String>,
    /// Listen address
    #[arg(long)]
    bind: Option<String>,
    /// Serve frames as captured instead of rotated by 180°
    #[arg(long)]
    no_rotate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        config.camera = camera;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if args.no_rotate {
        config.rotate_180 = false;
    }

    tracing::info!("lookoutd starting");

    let spec: CameraSpec = config
        .camera
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid camera {:?}: {e}", config.camera))?;
    let camera = open_source(&spec, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {spec}"))?;

    let state = AppState::new(camera, config.rotate_180, config.jpeg_quality);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, rotate_180 = config.rotate_180, "lookoutd ready");

    // Open streams are dropped on ctrl-c.
    tokio::select! {
        result = axum::serve(listener, router(state)).into_future() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("lookoutd shutting down"),
    }

    Ok(())
}
