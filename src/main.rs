use anyhow::Result;
use clap::Parser;
use crashwatch::classifier::{FrameClassifier, HttpClassifier};
use crashwatch::config::{CameraSourceConfig, CrashwatchConfig};
use crashwatch::coordinator::SessionCoordinator;
use crashwatch::detector::AccidentDetector;
use crashwatch::encoder::ClipEncoder;
use crashwatch::ingest::{resolve_fps, FfmpegOpener, IngestorPool, SourceOpener};
use crashwatch::records::{AccidentStatus, HttpRecordStore, RecordStore, RecordUpdate};
use crashwatch::storage::{ClipStorage, HttpClipStorage};
use crashwatch::frame_channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "crashwatch")]
#[command(about = "Multi-camera traffic accident detection and clip extraction")]
#[command(version)]
#[command(long_about = "Watches a fleet of CCTV streams, runs each frame through an \
inference service, and reacts to detected accidents by opening an accident record, \
extracting a clip of footage around the event, and uploading it to blob storage.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "crashwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting crashwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CrashwatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("Configuration validation failed: {}", e);
        }
        return Err(e.into());
    }
    if args.validate_config {
        println!("Configuration is valid");
        return Ok(());
    }

    run(config).await
}

async fn run(config: CrashwatchConfig) -> Result<()> {
    let records: Arc<dyn RecordStore> =
        Arc::new(HttpRecordStore::new(&config.collaborators.record_store_url));
    let storage: Arc<dyn ClipStorage> =
        Arc::new(HttpClipStorage::new(&config.collaborators.storage_url));

    // A model that cannot be resolved is a startup error, not something to
    // limp along without.
    let classifier = Arc::new(
        HttpClassifier::resolve(&config.collaborators.inference_url, &config.detection.model)
            .await?,
    );
    info!(model = %config.detection.model, "inference model resolved");

    sweep_stale_records(records.as_ref()).await;

    let cameras = camera_inventory(&config, records.as_ref()).await?;
    if cameras.is_empty() {
        error!("No cameras configured and none known to the record store");
        anyhow::bail!("no cameras to watch");
    }

    let opener: Arc<dyn SourceOpener> = Arc::new(FfmpegOpener::new(&config.clip.ffmpeg_path));
    let encoder = Arc::new(ClipEncoder::new(&config.clip));

    let (sender, receiver) = frame_channel(config.session.channel_capacity);
    let mut coordinator =
        SessionCoordinator::new(&config.session, Arc::clone(&records), Arc::clone(&storage));
    let mut pool = IngestorPool::new();

    for camera in &cameras {
        // Probe before committing: a camera whose stream will not open is
        // dropped here rather than wasting an ingestor on it.
        match opener.open(&camera.url).await {
            Ok(_) => {}
            Err(e) => {
                warn!(camera = %camera.id, "skipping camera, stream did not open: {}", e);
                continue;
            }
        }

        let fps = resolve_fps(opener.as_ref(), &camera.url, camera.fps).await;
        let detector = AccidentDetector::new(
            &camera.id,
            fps,
            &config.detection,
            &config.clip,
            Arc::clone(&classifier) as Arc<dyn FrameClassifier>,
            Arc::clone(&encoder),
        );
        coordinator.add_camera(camera.latitude, camera.longitude, detector);
        pool.spawn(&camera.id, &camera.url, fps, Arc::clone(&opener), sender.clone());
        info!(camera = %camera.id, fps, url = %camera.url, "camera registered");
    }

    if pool.is_empty() {
        error!("None of the {} configured cameras could be opened", cameras.len());
        anyhow::bail!("no camera stream could be opened");
    }
    drop(sender);

    let running = Arc::new(AtomicBool::new(true));
    let coordinator_handle = tokio::spawn(coordinator.run(receiver, Arc::clone(&running)));

    info!(cameras = pool.len(), "crashwatch running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Producers first, then the consumer: the coordinator drains whatever
    // the ingestors left on the channel before it finalizes.
    pool.stop(config.session.join_timeout()).await;
    running.store(false, Ordering::Relaxed);
    if let Err(e) = coordinator_handle.await {
        error!("Coordinator task failed: {}", e);
    }

    info!("crashwatch stopped");
    Ok(())
}

/// Records left in DETECTED by a previous run will never get their clip;
/// close them out instead of leaving them dangling forever. Best effort:
/// a dead record store must not prevent startup.
async fn sweep_stale_records(records: &dyn RecordStore) {
    let stale = match records.list_detected_records().await {
        Ok(stale) => stale,
        Err(e) => {
            warn!("Could not list stale records: {}", e);
            return;
        }
    };

    for record_id in stale {
        warn!(record = %record_id, "closing stale record from a previous run");
        let update = RecordUpdate::status(AccidentStatus::Failed);
        if let Err(e) = records.update_accident_record(&record_id, update).await {
            warn!(record = %record_id, "failed to close stale record: {}", e);
        }
    }
}

/// The camera fleet: the configuration file wins when it lists cameras,
/// otherwise the record store's inventory is used.
async fn camera_inventory(
    config: &CrashwatchConfig,
    records: &dyn RecordStore,
) -> Result<Vec<CameraSourceConfig>> {
    if !config.cameras.is_empty() {
        return Ok(config.cameras.clone());
    }

    info!("No cameras configured, fetching inventory from record store");
    let cameras = records.list_cameras().await?;
    Ok(cameras
        .into_iter()
        .map(|camera| CameraSourceConfig {
            id: camera.camera_id,
            latitude: camera.latitude,
            longitude: camera.longitude,
            url: camera.url,
            fps: None,
        })
        .collect())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crashwatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Crashwatch configuration file");
    println!("# Defaults for every available option");
    println!();

    match toml::to_string_pretty(&CrashwatchConfig::default()) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => eprintln!("Failed to render default configuration: {}", e),
    }
}
