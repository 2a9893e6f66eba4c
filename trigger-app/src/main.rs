mod workers;

use std::{
    io, process,
    sync::{Arc, mpsc},
    time::Duration,
};

use core_types::{
    AppConfig, ConfigError, ServiceMetricsReporter, TimeStampedData, TriggerCandidate,
    TriggerDecision, TriggerInhibit, render_samples,
};
use engine_api::{Engine, EngineError};
use log::{info, warn};
use module_level_trigger::ModuleLevelTrigger;
use thiserror::Error;
use timing_candidate_maker::TimingCandidateMaker;
use tracing_subscriber::EnvFilter;
use trigger_io::{ConnectionHub, IoError};

use workers::{spawn_decision_consumer, spawn_pulser, spawn_status_logger};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("fatal: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let hub = Arc::new(ConnectionHub::new());
    register_connections(&hub, &config)?;

    let maker = Arc::new(TimingCandidateMaker::new(
        "tcm",
        &hub,
        &config.connections.timing_data,
        &config.connections.trigger_candidates,
    )?);
    maker.configure(&config.timing)?;
    let mlt = Arc::new(ModuleLevelTrigger::new(
        "mlt",
        Arc::clone(&hub),
        &config.connections.trigger_candidates,
    )?);
    mlt.configure(&config.mlt)?;

    let decisions = hub.queue_receiver::<TriggerDecision>(&config.mlt.dfo_connection)?;
    let consumer = spawn_decision_consumer(decisions)?;

    mlt.start(config.run_number)?;
    maker.start(config.run_number)?;
    mlt.enable_triggers()?;
    log_engine_health("mlt", &*mlt);
    log_engine_health("tcm", &*maker);

    let pulser = match (config.pulser_interval_ms, config.timing.signals.first()) {
        (0, _) => None,
        (_, None) => {
            warn!("pulser requested but no timing signal types are configured");
            None
        }
        (interval_ms, Some(signal)) => Some(spawn_pulser(
            hub.queue_sender::<TimeStampedData>(&config.connections.timing_data)?,
            signal.signal_type,
            Duration::from_millis(interval_ms),
        )?),
    };
    let reporters: Vec<Arc<dyn ServiceMetricsReporter>> = vec![
        Arc::clone(&mlt) as Arc<dyn ServiceMetricsReporter>,
        Arc::clone(&maker) as Arc<dyn ServiceMetricsReporter>,
    ];
    let status_logger = spawn_status_logger(
        reporters.clone(),
        Duration::from_secs(config.status_interval_secs),
    )?;

    info!(
        "run {} in progress; press Ctrl+C to shut down",
        config.run_number
    );
    wait_for_shutdown_signal()?;
    info!("shutdown signal received; stopping run {}", config.run_number);

    if let Some(pulser) = pulser {
        pulser.shutdown();
    }
    maker.stop()?;
    mlt.stop()?;
    status_logger.shutdown();
    consumer.shutdown();
    maker.scrap()?;
    mlt.scrap()?;

    for reporter in &reporters {
        info!(
            "final metrics\n{}",
            render_samples(reporter.service_name(), &reporter.collect_metrics()).trim_end()
        );
    }
    Ok(())
}

fn register_connections(hub: &ConnectionHub, config: &AppConfig) -> Result<(), IoError> {
    let capacity = config.connections.queue_capacity;
    hub.register_queue::<TimeStampedData>(&config.connections.timing_data, capacity)?;
    hub.register_queue::<TriggerCandidate>(&config.connections.trigger_candidates, capacity)?;
    hub.register_queue::<TriggerDecision>(&config.mlt.dfo_connection, capacity)?;
    hub.register_signal::<TriggerInhibit>(&config.mlt.dfo_busy_connection, capacity)?;
    Ok(())
}

fn log_engine_health(label: &str, engine: &dyn Engine) {
    let health = engine.health();
    info!(
        "{label} {}: {:?} ({:?})",
        engine.lifecycle(),
        health.status,
        health.detail
    );
}

fn wait_for_shutdown_signal() -> Result<(), AppError> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] IoError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("failed while waiting for shutdown signal: {0}")]
    ShutdownWait(#[from] mpsc::RecvError),
}
