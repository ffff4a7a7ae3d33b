use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::builder::build_and_save;
use rollcall_core::engine::run_attendance;
use rollcall_core::enroll::capture_samples;
use rollcall_core::{AttendanceLog, AttendanceSession, DedupScope, DescriptorTable, Identity, Recognition};
use rollcall_hw::Camera;
use rollcall_vision::{OnnxEncoder, SeetaLocator};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from a webcam")]
struct Cli {
    /// TOML config file (also read from ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Camera device path, or "auto"
    #[arg(long, global = true)]
    camera: Option<String>,
    /// Directory of enrollment samples
    #[arg(long, global = true)]
    image_dir: Option<PathBuf>,
    /// Descriptor table file
    #[arg(long, global = true)]
    table: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for one person
    Enroll {
        /// Numeric or short identifier for this person
        #[arg(long)]
        id: String,
        /// Display name recorded in the attendance log
        #[arg(long)]
        name: String,
        /// Number of samples to capture
        #[arg(long)]
        samples: Option<u32>,
    },
    /// Encode every enrollment sample into the descriptor table
    Build,
    /// Recognize faces and log attendance until stopped
    Run {
        /// Attendance CSV
        #[arg(long)]
        log: Option<PathBuf>,
        /// Maximum accepted descriptor distance (exclusive)
        #[arg(long)]
        threshold: Option<f32>,
        /// "session" or "day"
        #[arg(long)]
        dedup: Option<DedupScope>,
    },
    /// List V4L2 capture devices
    Cameras,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut overrides = Overrides {
        camera_device: cli.camera,
        image_dir: cli.image_dir,
        table_path: cli.table,
        ..Default::default()
    };
    match &cli.command {
        Commands::Enroll { samples, .. } => overrides.samples_per_identity = *samples,
        Commands::Run { log, threshold, dedup } => {
            overrides.log_path = log.clone();
            overrides.match_threshold = *threshold;
            overrides.dedup_scope = *dedup;
        }
        Commands::Build | Commands::Cameras => {}
    }

    let config = Config::load(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Enroll { id, name, .. } => enroll(config, Identity::new(id, name)?).await,
        Commands::Build => build(config).await,
        Commands::Run { .. } => run(config).await,
        Commands::Cameras => {
            list_cameras();
            Ok(())
        }
    }
}

/// Stop flag raised by Ctrl-C or by typing `q` + Enter.
fn stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));

    let on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            on_signal.store(true, Ordering::SeqCst);
        }
    });

    // Plain thread: a blocked stdin read must not hold up runtime shutdown.
    let on_quit = Arc::clone(&stop);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                tracing::info!("quit requested; stopping");
                on_quit.store(true, Ordering::SeqCst);
                break;
            }
        }
    });

    stop
}

async fn enroll(config: Config, identity: Identity) -> Result<()> {
    println!(
        "Capturing {} samples for {} (id {}). Look at the camera; type q + Enter to stop early.",
        config.samples_per_identity, identity.name, identity.id
    );

    let stop = stop_flag();
    let summary = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut locator = SeetaLocator::load(&config.locator_model, config.locator_settings())?;
        let camera = Camera::open_configured(&config.camera_device, config.camera_width, config.camera_height)
            .context("failed to open camera")?;
        let mut frames = camera.stream(config.mirror)?;

        let summary = capture_samples(
            &mut frames,
            &mut locator,
            &identity,
            &config.image_dir,
            &config.enroll_options(),
            &stop,
        )?;
        Ok(summary)
    })
    .await??;

    if summary.cancelled {
        println!("Stopped early: {} samples saved.", summary.saved);
    } else {
        println!("Done: {} samples saved.", summary.saved);
    }
    Ok(())
}

async fn build(config: Config) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut locator = SeetaLocator::load(&config.locator_model, config.locator_settings())?;
        let mut encoder = OnnxEncoder::load(&config.encoder_model, config.encoder_settings())?;
        let report = build_and_save(&config.image_dir, &config.table_path, &mut locator, &mut encoder)
            .with_context(|| format!("failed to build {}", config.table_path.display()))?;
        println!("Saved {} descriptors to {}", report.encoded, config.table_path.display());
        Ok(report)
    })
    .await??;

    if report.skipped() > 0 {
        println!("Skipped {} files (see warnings above).", report.skipped());
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let session_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("attendance", session = %session_id);

    let stop = stop_flag();
    println!("Taking attendance. Press Ctrl-C or type q + Enter to stop.");

    tokio::task::spawn_blocking(move || -> Result<()> {
        let _guard = span.enter();

        let table = DescriptorTable::load_or_empty(&config.table_path);
        let log = AttendanceLog::new(&config.log_path);
        let mut session = AttendanceSession::new(table, config.match_threshold, log.clone());
        if config.dedup_scope == DedupScope::Day {
            session.seed_from_log(&log, chrono::Local::now().date_naive())?;
        }

        let mut locator = SeetaLocator::load(&config.locator_model, config.locator_settings())?;
        let mut encoder = OnnxEncoder::load(&config.encoder_model, config.encoder_settings())?;
        let camera = Camera::open_configured(&config.camera_device, config.camera_width, config.camera_height)
            .context("failed to open camera")?;
        let mut frames = camera.stream(config.mirror)?;

        let result = run_attendance(&mut frames, &mut locator, &mut encoder, &mut session, &stop, |outcomes| {
            for outcome in outcomes {
                if let Recognition::Marked { record, .. } = &outcome.recognition {
                    println!(
                        "[ATTENDANCE] Marked {} for {} at {}",
                        record.status.to_uppercase(),
                        record.name,
                        record.time_string()
                    );
                }
            }
        });

        match result {
            Ok(summary) => {
                println!(
                    "Stopped after {} frames; {} marked present this run.",
                    summary.frames,
                    session.marked_count()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "recognition loop failed");
                Err(e.into())
            }
        }
    })
    .await?
}

fn list_cameras() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}
