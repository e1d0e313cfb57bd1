use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookout_core::{MatchPolicy, Registry};
use lookout_hw::Camera;
use std::path::PathBuf;

mod config;
mod display;
mod gate;
mod session;

use config::Config;
use display::Preview;
use gate::Mode;

#[derive(Parser)]
#[command(name = "lookout", about = "Webcam person counter and face finder")]
struct Cli {
    /// TOML config file (default: $LOOKOUT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Camera: device index, device path or MJPEG stream URL
    #[arg(long, global = true)]
    camera: Option<String>,
    /// Folder of reference images
    #[arg(long, global = true)]
    reference_dir: Option<PathBuf>,
    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Maximum encoding distance for a face match
    #[arg(long, global = true)]
    tolerance: Option<f32>,
    /// Which reference wins when several are within tolerance
    #[arg(long, global = true)]
    match_policy: Option<MatchPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session; asks what to do unless --mode is given
    Run {
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },
    /// Capture a reference photo, then recognize faces and count people
    Find,
    /// Count people
    Count,
    /// Recognize faces against the reference folder
    Recognize,
    /// Capture a reference photo only
    Capture,
    /// Encode the reference folder and list the names found
    Registry {
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices {
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(camera) = &self.camera {
            config.camera = camera.clone();
        }
        if let Some(dir) = &self.reference_dir {
            config.reference_dir = dir.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(tolerance) = self.tolerance {
            config.face_tolerance = tolerance;
        }
        if let Some(policy) = self.match_policy {
            config.match_policy = policy;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    match cli.command {
        Commands::Run { mode } => {
            let mode = mode.unwrap_or_else(gate::ask);
            windowed(config, move |config, mut preview| async move {
                session::dispatch(mode, &config, &mut preview).await
            })
        }
        Commands::Find => windowed(config, |config, mut preview| async move {
            session::dispatch(Mode::Find, &config, &mut preview).await
        }),
        Commands::Count => windowed(config, |config, mut preview| async move {
            session::dispatch(Mode::Count, &config, &mut preview).await
        }),
        Commands::Recognize => windowed(config, |config, mut preview| async move {
            session::dispatch(Mode::Recognize, &config, &mut preview).await
        }),
        Commands::Capture => windowed(config, |config, mut preview| async move {
            match session::capture_reference(&config, &mut preview).await? {
                session::Capture::Saved(path) => println!("Saved {}", path.display()),
                session::Capture::Aborted => println!("Capture cancelled"),
            }
            Ok(())
        }),
        Commands::Registry { json } => list_registry(&config, json),
        Commands::Devices { json } => list_devices(json),
    }
}

/// Run a session inside the preview window.
fn windowed<F, Fut>(config: Config, session: F) -> Result<()>
where
    F: FnOnce(Config, Preview) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + 'static,
{
    let (width, height) = (config.frame_width, config.frame_height);
    let preview = Preview::new(config.font_size);
    display::run_window("Lookout", width, height, session(config, preview))
}

fn list_registry(config: &Config, json: bool) -> Result<()> {
    let mut faces = session::load_faces(config)?;
    let registry = Registry::load_dir(&config.reference_dir, &mut faces)
        .with_context(|| format!("failed to load {}", config.reference_dir.display()))?;

    if json {
        let entries: Vec<_> = registry
            .iter()
            .map(|r| serde_json::json!({ "name": r.name, "source": r.source }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No reference images in {}", config.reference_dir.display());
    }
    for reference in registry.iter() {
        println!("{:<24} {}", reference.name, reference.source.display());
    }
    Ok(())
}

fn list_devices(json: bool) -> Result<()> {
    let devices = Camera::list_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for device in &devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
    Ok(())
}
