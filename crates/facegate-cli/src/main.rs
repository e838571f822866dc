use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::TrainingCorpus;
use facegate_hw::Camera;
use facegate_pipeline::{
    spawn_enrollment, spawn_recognition, train_model, CaptureBackend, DeviceBackend, HostMessage,
    PipelineConfig, RenderedFrame, WorkerExit, WorkerHandle,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facegate", about = "Face enrollment and recognition against a local camera")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facegate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture training samples for an identity across the pose sequence
    Enroll {
        /// Application identity to register (e.g. an employee id)
        #[arg(short, long)]
        identity: String,
        /// Save the last rendered frame as PNG on exit
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Recognize faces until interrupted
    Recognize {
        /// Stop after the first recognized identity
        #[arg(long)]
        once: bool,
        /// Save the last rendered frame as PNG on exit
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Rebuild the classifier model from every enrolled subject
    Train,
    /// List V4L2 capture devices
    Devices,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { identity, snapshot } => {
            let config = load_config(cli.config.as_deref())?;
            let backend = DeviceBackend::new(&config);
            let (handle, rx) = spawn_enrollment(backend, config, identity)?;
            let last = drive(handle, rx, false).await?;
            save_snapshot(snapshot.as_deref(), last.as_ref())?;
        }
        Commands::Recognize { once, snapshot } => {
            let config = load_config(cli.config.as_deref())?;
            let backend = DeviceBackend::new(&config);
            let (handle, rx) = spawn_recognition(backend, config)?;
            let last = drive(handle, rx, once).await?;
            save_snapshot(snapshot.as_deref(), last.as_ref())?;
        }
        Commands::Train => {
            let config = load_config(cli.config.as_deref())?;
            let mut classifier = DeviceBackend::new(&config).classifier();
            let corpus = TrainingCorpus::new(config.training_dir(), config.sample_size);
            let model_path = config.model_path();
            let samples = train_model(&mut classifier, &corpus, &model_path)
                .context("training classifier model")?;
            println!("trained on {samples} samples; model saved to {}", model_path.display());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            let rendered = toml::to_string_pretty(&config).context("serializing config")?;
            print!("{rendered}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(path).context("loading configuration")
}

/// Pump host messages until the worker's terminal message, stopping it on
/// Ctrl-C. Returns the last rendered frame.
async fn drive(
    handle: WorkerHandle,
    mut rx: UnboundedReceiver<HostMessage>,
    once: bool,
) -> Result<Option<RenderedFrame>> {
    let mut last_frame: Option<RenderedFrame> = None;
    let mut last_status: Option<(Option<String>, Option<String>)> = None;
    let mut frames = 0u64;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let terminal = msg.is_terminal();
                match msg {
                    HostMessage::Loading => tracing::info!("loading"),
                    HostMessage::RenderedFrame(frame) => {
                        frames += 1;
                        let status = (frame.overlay.status.clone(), frame.overlay.pose.clone());
                        if last_status.as_ref() != Some(&status) {
                            if let (Some(text), pose) = &status {
                                println!("{text}  {}", pose.as_deref().unwrap_or_default());
                            }
                            last_status = Some(status);
                        }
                        last_frame = Some(frame);
                    }
                    HostMessage::IdentityRecognized { identity, confidence } => {
                        println!("recognized {identity} ({confidence}%)");
                        if once {
                            handle.stop();
                        }
                    }
                    HostMessage::EnrollmentComplete { label, identity } => {
                        println!("enrolled {identity} as label {label}");
                    }
                    HostMessage::IdleFrame => {}
                    HostMessage::ConnectionErrorFrame { reason } => {
                        eprintln!("camera unavailable: {reason}")
                    }
                }
                if terminal {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; stopping worker");
                handle.stop();
            }
        }
    }

    let exit = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("waiting for worker")??;
    tracing::info!(frames, ?exit, "worker finished");

    if let WorkerExit::Failed(reason) = exit {
        bail!("camera pipeline failed: {reason}");
    }
    Ok(last_frame)
}

fn save_snapshot(path: Option<&Path>, frame: Option<&RenderedFrame>) -> Result<()> {
    let (Some(path), Some(frame)) = (path, frame) else {
        return Ok(());
    };
    frame
        .image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    println!("snapshot saved to {}", path.display());
    Ok(())
}
