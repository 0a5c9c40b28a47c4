//! `rasguard` -- tank monitoring daemon.
//!
//! Samples the configured probes on a fixed cadence, publishes readings to
//! ThingsBoard, appends them to a CSV log and pushes threshold alerts via
//! Pushover. Stops on SIGINT/SIGTERM or when the UPS battery runs low, in
//! which case it can halt the host.
//!
//! # Environment variables
//!
//! | Variable                  | Required              | Description                         |
//! |---------------------------|-----------------------|-------------------------------------|
//! | `RASGUARD_CONFIG`         | no                    | Config path, overrides the default  |
//! | `PUSHOVER_TOKEN`          | for Pushover alerts   | Application token                   |
//! | `PUSHOVER_USER`           | for Pushover alerts   | User or group key                   |
//! | `THINGSBOARD_TOKEN_<ID>`  | with `telemetry`      | Device token per sensor (`token_env` overrides the name) |
//! | `THINGSBOARD_TOKEN_UPS_BATTERY` | with `telemetry` and a battery | Device token for the battery level (`battery.token_env` overrides) |
//! | `RUST_LOG`                | no                    | Log filter, default `info` for rasguard crates |

mod config;
mod fallback;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rasguard_connectors::pushover::PUSHOVER_URL;
use rasguard_connectors::{
    CsvLog, HttpConfig, HttpConnector, IioChannel, JsonStateFile, PowerSupplyCapacity, PushoverNotifier,
    ThingsBoardPublisher, W1Thermometer,
};
use rasguard_core::cycle::BATTERY_SENSOR_ID;
use rasguard_core::{
    AlertDispatcher, Collaborators, DispatchStateStore, MainsPower, Notifier, PowerSource, Scheduler, Sensor,
    StopReason, TelemetryPublisher,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AlertConfig, Config, SensorConfig, SourceConfig, TelemetryConfig};
use crate::fallback::{LogNotifier, LogPublisher};

#[derive(Parser, Debug)]
#[command(name = "rasguard", version)]
#[command(about = "Sampling, filtering and alerting loop for aquaculture tanks", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "RASGUARD_CONFIG", default_value = "/etc/rasguard/config.yaml")]
    config: PathBuf,

    /// Env file with tokens (default: `.env` in the working directory, if any)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rasguard=info,rasguard_core=info,rasguard_connectors=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&cli.config)?;
    let mut scheduler = assemble(&config)?;

    if cli.check {
        scheduler.stop(StopReason::Interrupted).await;
        tracing::info!(
            sensors = config.sensors.len(),
            config = %cli.config.display(),
            "configuration OK"
        );
        return Ok(());
    }

    tracing::info!(
        version = rasguard_core::VERSION,
        sensors = config.sensors.len(),
        interval_secs = config.cycle_interval_secs,
        "Starting rasguard",
    );

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.stop();
    });

    let reason = scheduler.run().await;
    tracing::info!(%reason, "monitoring stopped");

    if let StopReason::BatteryCritical { .. } = reason {
        if let Some(command) = &config.battery.halt_command {
            halt(command).await;
        }
    }
    Ok(())
}

/// Build the scheduler and every collaborator from the configuration
fn assemble(config: &Config) -> anyhow::Result<Scheduler> {
    let sensors = config
        .sensors
        .iter()
        .map(sensor)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut columns: Vec<_> = sensors.iter().map(|sensor| sensor.spec().id().clone()).collect();
    if config.battery.is_monitored() {
        columns.push(BATTERY_SENSOR_ID.into());
    }
    let mut log = CsvLog::new(&config.log.path, columns);
    if let Some(backup) = &config.log.backup_path {
        log = log.with_backup(backup);
    }

    let publisher: Box<dyn TelemetryPublisher> = match &config.telemetry {
        Some(telemetry) => Box::new(thingsboard(telemetry, config)?),
        None => {
            tracing::warn!("no telemetry configured, readings only go to the local log");
            Box::new(LogPublisher)
        }
    };

    let power: Box<dyn PowerSource> = if config.battery.is_monitored() {
        Box::new(PowerSupplyCapacity::new(config.battery.capacity_paths.clone()))
    } else {
        tracing::info!("no battery capacity source configured, assuming mains power");
        Box::new(MainsPower)
    };

    let state_store = config
        .alerts
        .state_file
        .as_ref()
        .map(|path| Box::new(JsonStateFile::new(path)) as Box<dyn DispatchStateStore>);

    let mut dispatcher = AlertDispatcher::new(config.alerts.renotify()?);
    if let Some(title) = &config.alerts.title {
        dispatcher = dispatcher.with_title(title.clone());
    }

    let collaborators = Collaborators {
        publisher,
        log: Box::new(log),
        notifier: notifier(&config.alerts)?,
        power,
        state_store,
    };

    Scheduler::new(config.scheduler()?, sensors, collaborators, dispatcher).context("assembling scheduler")
}

fn sensor(config: &SensorConfig) -> anyhow::Result<Sensor> {
    let spec = config.spec()?;
    let sensor = match &config.source {
        SourceConfig::W1 { device } => Sensor::new(spec, W1Thermometer::new(device)),
        SourceConfig::W1File { path } => Sensor::new(spec, W1Thermometer::at(path)),
        SourceConfig::Iio { device_dir, channel } => Sensor::new(spec, IioChannel::new(device_dir, *channel)),
    };
    Ok(sensor)
}

fn thingsboard(telemetry: &TelemetryConfig, config: &Config) -> anyhow::Result<ThingsBoardPublisher> {
    let http = HttpConnector::new(
        HttpConfig::new(&telemetry.url)
            .timeout_secs(telemetry.timeout_secs)
            .max_retries(telemetry.max_retries),
    )
    .context("telemetry")?;

    let mut publisher = ThingsBoardPublisher::new(http);
    for sensor in &config.sensors {
        let var = sensor.token_env();
        let token = std::env::var(&var)
            .with_context(|| format!("sensor {}: ThingsBoard device token {} is not set", sensor.id, var))?;
        publisher = publisher.device(sensor.id.as_str(), token, sensor.telemetry_key());
    }
    if config.battery.is_monitored() {
        let var = config.battery.token_env();
        let token = std::env::var(var)
            .with_context(|| format!("battery: ThingsBoard device token {var} is not set"))?;
        publisher = publisher.device(BATTERY_SENSOR_ID, token, BATTERY_SENSOR_ID);
    }
    Ok(publisher)
}

fn notifier(alerts: &AlertConfig) -> anyhow::Result<Box<dyn Notifier>> {
    let token = std::env::var(config::PUSHOVER_TOKEN_ENV);
    let user = std::env::var(config::PUSHOVER_USER_ENV);
    match (token, user) {
        (Ok(token), Ok(user)) => {
            let url = alerts.pushover_url.as_deref().unwrap_or(PUSHOVER_URL);
            let http = HttpConnector::new(HttpConfig::new(url)).context("pushover")?;
            Ok(Box::new(PushoverNotifier::new(http, token, user)))
        }
        _ => {
            tracing::warn!(
                "{} / {} not set, alerts only go to the log",
                config::PUSHOVER_TOKEN_ENV,
                config::PUSHOVER_USER_ENV
            );
            Ok(Box::new(LogNotifier))
        }
    }
}

async fn halt(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };
    tracing::warn!(?command, "halting host after battery shutdown");
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::error!(%status, "halt command failed"),
        Err(e) => tracing::error!(error = %e, "halt command could not be started"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing the current step and stopping");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing the current step and stopping");
        }
    }
}
