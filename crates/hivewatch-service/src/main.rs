//! HiveWatch - edge telemetry collector.
//!
//! Run with: `cargo run -p hivewatch-service -- run`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hivewatch_core::{
    CalibrationOperator, CalibrationStep, Calibrator, Error as CoreError, ErrorSink, JsonErrorLog,
    MeasurementStatistics, ProfileFile, TracingSink, codes,
};
use hivewatch_service::{
    AppState, Collector, Config, SensorSet, SyncEngine, api, build_submitter,
};
use hivewatch_store::{RecordQuery, Store};
use hivewatch_types::CalibrationMode;

/// HiveWatch - sensor collector with store-and-forward uploads.
#[derive(Parser, Debug)]
#[command(name = "hivewatch")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector and the REST API in the foreground.
    Run {
        /// Bind address (overrides config).
        #[arg(short, long)]
        bind: Option<String>,

        /// Do not start the REST API.
        #[arg(long)]
        no_api: bool,
    },

    /// Deliver the unsynced backlog once and exit.
    Sync,

    /// Delete records and error log entries past their retention window.
    Prune,

    /// Show the latest stored records.
    Records {
        /// Number of records to show.
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only show records not yet delivered.
        #[arg(long)]
        unsynced: bool,
    },

    /// Calibrate the load cell interactively.
    Calibrate {
        /// Calibration procedure.
        #[arg(short, long, default_value = "three-point")]
        mode: CalibrationMode,

        /// Known weight in grams (prompted if omitted).
        #[arg(short, long)]
        known_weight: Option<f64>,

        /// Skip the verification run after calibrating.
        #[arg(long)]
        skip_self_test: bool,
    },

    /// Show the active calibration profile.
    Calibration,

    /// Sample the load cell and print statistics.
    Measure {
        /// Number of raw samples.
        #[arg(short = 'n', long, default_value_t = 50)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    config.validate()?;

    match args.command {
        Command::Run { bind, no_api } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            run_service(config, no_api).await
        }
        Command::Sync => sync_once(config).await,
        Command::Prune => prune(config),
        Command::Records { limit, unsynced } => show_records(config, limit, unsynced),
        Command::Calibrate {
            mode,
            known_weight,
            skip_self_test,
        } => calibrate(config, mode, known_weight, skip_self_test).await,
        Command::Calibration => show_calibration(config),
        Command::Measure { count } => measure(config, count).await,
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in ["hivewatch", "hivewatch_service", "hivewatch_core", "hivewatch_store"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Open the configured error log, falling back to tracing only.
fn error_sink(config: &Config) -> (Arc<dyn ErrorSink>, Option<Arc<JsonErrorLog>>) {
    match &config.error_log.path {
        Some(path) => {
            let log = Arc::new(JsonErrorLog::new(path));
            let sink: Arc<dyn ErrorSink> = log.clone();
            (sink, Some(log))
        }
        None => (Arc::new(TracingSink), None),
    }
}

async fn run_service(config: Config, no_api: bool) -> anyhow::Result<()> {
    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;
    let (sink, error_log) = error_sink(&config);
    let state = AppState::new(store, config.clone(), sink);

    if let Err(e) = state.reload_calibration().await {
        warn!("Starting without calibration: {}", e);
    }

    let submitter = build_submitter(&config.upload)?;
    if submitter.is_none() {
        warn!("No upload URL configured, records will only be stored locally");
    }

    let mut collector = Collector::new(
        Arc::clone(&state),
        SensorSet::from_config(&config),
        submitter,
    );
    if let Some(log) = error_log {
        collector = collector.with_error_log(log);
    }
    let collector_task = tokio::spawn(collector.run());

    let shutdown = state.collector.shutdown_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, finishing the current cycle");
            shutdown.cancel();
        }
    });

    if no_api {
        info!("REST API disabled");
    } else {
        let app = Router::new()
            .merge(api::router())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(&state));

        let addr: SocketAddr = config.server.bind.parse()?;
        info!("Starting server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
    }

    collector_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn sync_once(config: Config) -> anyhow::Result<()> {
    let Some(submitter) = build_submitter(&config.upload)? else {
        bail!("No upload URL configured (set [upload] url)");
    };
    let store = Mutex::new(Store::open(&config.storage.path)?);
    let (sink, _) = error_sink(&config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let engine = SyncEngine::new(&store, sink.as_ref(), config.upload.timeout());
    let report = engine.run_sync_cycle(submitter.as_ref(), &cancel).await?;
    println!(
        "Delivered {} of {} records ({} failed{})",
        report.succeeded,
        report.attempted,
        report.failed,
        if report.cancelled { ", cancelled" } else { "" }
    );
    Ok(())
}

fn prune(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.path)?;
    let records = store.prune_older_than(config.storage.retention())?;
    println!(
        "Removed {} records older than {} days",
        records, config.storage.retention_days
    );

    if let Some(path) = &config.error_log.path {
        let entries = JsonErrorLog::new(path).prune_older_than(config.error_log.retention())?;
        println!(
            "Removed {} error log entries older than {} days",
            entries, config.error_log.retention_days
        );
    }
    Ok(())
}

fn show_records(config: Config, limit: u32, unsynced: bool) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.path)?;
    let mut query = RecordQuery::new().limit(limit);
    if unsynced {
        query = query.unsynced();
    }

    let records = store.query(&query)?;
    if records.is_empty() {
        println!("No records");
        return Ok(());
    }
    for record in records {
        let values: Vec<String> = record
            .readings
            .present()
            .map(|(channel, value)| format!("{channel}={value:.2}{}", channel.unit()))
            .collect();
        println!(
            "{:>6}  {}  {}  {}",
            record.id,
            record.captured_at,
            if record.synced { "synced  " } else { "unsynced" },
            values.join(" ")
        );
    }
    Ok(())
}

fn show_calibration(config: Config) -> anyhow::Result<()> {
    match ProfileFile::new(&config.calibration.path).load()? {
        Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
        None => println!(
            "Not calibrated (no profile at {})",
            config.calibration.path.display()
        ),
    }
    Ok(())
}

/// Walks the operator through calibration steps on the terminal.
struct TerminalOperator;

#[async_trait]
impl CalibrationOperator for TerminalOperator {
    async fn prepare(&self, step: CalibrationStep) -> hivewatch_core::Result<()> {
        let prompt = format!("{step}. Ready?");
        let ready = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(true)
                .interact()
        })
        .await
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))?
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;

        if ready {
            Ok(())
        } else {
            Err(CoreError::Cancelled)
        }
    }

    async fn step_completed(&self, _step: CalibrationStep, stats: &MeasurementStatistics) {
        let stability = stats
            .stability()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  mean {:.1}  median {:.1}  cv {}  ({} of {} samples kept, stability {})",
            stats.mean,
            stats.median,
            stats
                .cv
                .map(|cv| format!("{cv:.3}%"))
                .unwrap_or_else(|| "n/a".to_string()),
            stats.count,
            stats.input_count,
            stability
        );
    }
}

fn weight_sensor(config: &Config) -> anyhow::Result<Arc<dyn hivewatch_core::WeightSensor>> {
    SensorSet::from_config(config)
        .weight
        .context("No load cell configured (set [weight] path)")
}

async fn calibrate(
    config: Config,
    mode: CalibrationMode,
    known_weight: Option<f64>,
    skip_self_test: bool,
) -> anyhow::Result<()> {
    let sensor = weight_sensor(&config)?;
    let known_weight = match known_weight {
        Some(w) => w,
        None => tokio::task::spawn_blocking(|| {
            dialoguer::Input::<f64>::new()
                .with_prompt("Known weight in grams")
                .interact_text()
        })
        .await??,
    };

    let (sink, _) = error_sink(&config);
    let file = ProfileFile::new(&config.calibration.path);
    let calibrator = Calibrator::new(sensor.as_ref(), config.calibration.options(mode));
    let operator = TerminalOperator;

    let profile = match calibrator.run_and_save(known_weight, &operator, &file).await {
        Ok(profile) => profile,
        Err(e) => {
            sink.record(codes::CALIBRATION_FAILED, &e.to_string());
            bail!("{e} (previous calibration kept)");
        }
    };
    println!(
        "Saved calibration to {}: reference_unit={:.6} zero_offset={:.2}",
        file.path().display(),
        profile.reference_unit,
        profile.zero_offset
    );

    if !skip_self_test {
        let report = calibrator
            .self_test(&profile, known_weight, &operator)
            .await?;
        println!(
            "Self-test: tare {:.2}, weight {:.2} (expected {}), error {:.2}% - {}",
            report.tare_reading,
            report.weight_reading,
            report.expected,
            report.percent_error,
            report.grade
        );
    }
    println!("Restart the service or POST /api/calibration/reload to apply it.");
    Ok(())
}

async fn measure(config: Config, count: usize) -> anyhow::Result<()> {
    let sensor = weight_sensor(&config)?;
    let options = config.calibration.options(CalibrationMode::default());
    let calibrator = Calibrator::new(sensor.as_ref(), options);
    let stats = calibrator.measure(count).await?;

    println!("samples   {} ({} discarded)", stats.input_count, stats.discarded);
    println!("kept      {} ({:?})", stats.count, stats.rejection);
    println!("mean      {:.2}", stats.mean);
    println!("median    {:.2}", stats.median);
    println!("range     {:.2} .. {:.2}", stats.min, stats.max);
    if let Some(sd) = stats.stdev {
        println!("stdev     {:.3}", sd);
    }
    if let (Some(cv), Some(stability)) = (stats.cv, stats.stability()) {
        println!("cv        {:.3}% ({})", cv, stability);
    }
    if let Some((lo, hi)) = stats.ci95 {
        println!("ci95      {:.2} .. {:.2}", lo, hi);
    }

    if let Some(profile) = ProfileFile::new(&config.calibration.path).load()? {
        match profile.to_units(stats.mean) {
            Ok(weight) => println!("weight    {:.2} g", weight),
            Err(e) => println!("weight    n/a ({e})"),
        }
    }
    Ok(())
}
