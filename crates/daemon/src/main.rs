use std::path::PathBuf;
use std::sync::Arc;

use analysis_daemon::config::{load_config, load_pipeline};
use analysis_daemon::observer::EventLog;
use analysis_daemon::sensor::MockSensor;
use analysis_pipeline::{Dispatcher, Session, SessionClock};
use anyhow::Context;
use clap::{Arg, Command};
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analysis_daemon=debug,analysis_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Analysis daemon starting...");

    // --- Argument Parsing ---
    let matches = Command::new("analysis_daemon")
        .about("Runs a sensor analysis session against a mock sensor")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .default_value("config.json")
                .help("Daemon configuration (JSON)"),
        )
        .arg(
            Arg::new("pipeline")
                .long("pipeline")
                .value_name("FILE")
                .help("Pipeline description, overrides the configured one"),
        )
        .arg(
            Arg::new("storage-dir")
                .long("storage-dir")
                .value_name("DIR")
                .help("Session directory for spill and state files"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let mut config = load_config(&config_path)?;
    if let Some(pipeline) = matches.get_one::<String>("pipeline") {
        config.pipeline = PathBuf::from(pipeline);
    }
    if let Some(dir) = matches.get_one::<String>("storage-dir") {
        config.storage_dir = Some(PathBuf::from(dir));
    }
    config.validate()?;

    // --- Session ---
    let pipeline = load_pipeline(&config.pipeline)?;
    let dispatcher = Dispatcher::new();
    let session = Session::load(
        pipeline,
        dispatcher.notifier(),
        config.storage_dir.as_deref(),
        Arc::new(SessionClock::new()),
    )
    .context("Could not load the analysis session")?;

    let log = Arc::new(Mutex::new(EventLog::new(session.arena())));
    let log_id = dispatcher.register(Arc::clone(&log));
    session.scheduler().add_observer(log_id);
    for id in session.scheduler().graph().output_buffers() {
        if let Some(buffer) = session.arena().get(*id) {
            buffer.add_observer(log_id);
        }
    }

    let sensor_buffer = Arc::clone(
        session
            .buffer(&config.sensor.buffer)
            .with_context(|| format!("Sensor buffer '{}' is not declared", config.sensor.buffer))?,
    );

    session.start();
    let sensor = MockSensor::spawn(sensor_buffer, &config.sensor)?;

    // --- UI turn: deliver notifications until Ctrl-C ---
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down.");
                break;
            }
            _ = dispatcher.dispatch_next() => {}
        }
    }

    sensor.stop();
    session.stop();
    dispatcher.dispatch_pending();

    if config.save_state_on_exit {
        if let Some(dir) = &config.storage_dir {
            for (_, buffer) in session.arena().iter() {
                let path = dir.join(format!("{}.state", buffer.name()));
                if let Err(e) = buffer.write_state(&path) {
                    tracing::warn!("Could not save state of '{}': {}", buffer.name(), e);
                }
            }
            tracing::info!("Saved buffer states to {}", dir.display());
        }
    }

    {
        let log = log.lock();
        tracing::info!(
            "Analysis daemon stopped after {} cycles ({} skipped)",
            log.cycles(),
            log.skipped()
        );
    }
    Ok(())
}
