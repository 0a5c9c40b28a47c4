//! Simulated Tank Example
//!
//! Runs the full monitoring loop against simulated probes on a short
//! cadence, printing what would go to the dashboard, the log and the
//! notifier.
//!
//! ## What You'll See
//!
//! - Trimmed mean absorbing spikes and dropped reads
//! - The oxygen probe drifting out of range and the alert firing once
//! - A reminder after the re-notify backoff
//! - Orderly shutdown after a fixed number of seconds
//!
//! ## Running the Example
//!
//! ```bash
//! RUST_LOG=info cargo run --example simulated_tank
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rasguard_core::{
    AlertDispatcher, Calibration, Collaborators, CollaboratorError, CycleLog, CycleResult,
    FilteredReading, MainsPower, Notification, Notifier, RawReader, ReNotify, Scheduler,
    SchedulerConfig, Sensor, SensorError, SensorSpec, TelemetryPublisher, ThresholdRule,
};

/// Probe with a linear drift, small noise, a spike every 7th read and a
/// dropped read every 11th
struct SimulatedProbe {
    base: f64,
    drift_per_read: f64,
    noise: f64,
    reads: u64,
    seed: u32,
}

impl SimulatedProbe {
    fn new(base: f64, drift_per_read: f64, noise: f64, seed: u32) -> Self {
        Self {
            base,
            drift_per_read,
            noise,
            reads: 0,
            seed,
        }
    }

    /// LCG, good enough for jitter
    fn jitter(&mut self) -> f64 {
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        ((self.seed >> 16) as f64 / 32_768.0 - 1.0) * self.noise
    }
}

#[async_trait]
impl RawReader for SimulatedProbe {
    async fn read(&mut self) -> Result<f64, SensorError> {
        self.reads += 1;
        if self.reads % 11 == 0 {
            return Err(SensorError::Timeout);
        }
        let mut value = self.base + self.drift_per_read * self.reads as f64 + self.jitter();
        if self.reads % 7 == 0 {
            value *= 3.0;
        }
        Ok(value)
    }

    fn release(&mut self) {
        println!("  probe released after {} reads", self.reads);
    }
}

struct Dashboard;

#[async_trait]
impl TelemetryPublisher for Dashboard {
    async fn publish(&mut self, reading: &FilteredReading) -> Result<(), CollaboratorError> {
        println!(
            "  telemetry {:<12} {:>8.2} {:<5} ({} samples)",
            reading.sensor, reading.value, reading.unit, reading.samples_used
        );
        Ok(())
    }
}

struct ConsoleLog;

#[async_trait]
impl CycleLog for ConsoleLog {
    async fn append(&mut self, result: &CycleResult) -> Result<(), CollaboratorError> {
        println!(
            "  log cycle {}: {} readings, {} unavailable",
            result.index,
            result.readings().count(),
            result.unavailable().count()
        );
        Ok(())
    }
}

struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&mut self, notification: &Notification) -> Result<(), CollaboratorError> {
        println!("  >>> {:?} notification\n{}", notification.priority, notification.message);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("RASGuard Simulated Tank");
    println!("=======================\n");

    let temperature = SensorSpec::builder("temperature")
        .label("Temperature")
        .unit("°C")
        .samples(10, 2)
        .sample_spacing(Duration::from_millis(10))
        .decimals(2)
        .thresholds(ThresholdRule::range(18.0, 28.0))
        .build()?;

    // raw volts from a galvanic probe, 0.0125 V per mg/L
    let oxygen = SensorSpec::builder("oxygen")
        .label("Dissolved oxygen")
        .unit("mg/L")
        .samples(10, 2)
        .sample_spacing(Duration::from_millis(10))
        .calibration(Calibration::Linear { gain: 80.0, offset: 0.0 })
        .decimals(2)
        .thresholds(ThresholdRule::at_least(5.0))
        .build()?;

    let sensors = vec![
        Sensor::new(temperature, SimulatedProbe::new(24.0, 0.0, 0.3, 7)),
        Sensor::new(oxygen, SimulatedProbe::new(0.09, -0.0008, 0.001, 42)),
    ];

    let collaborators = Collaborators {
        publisher: Box::new(Dashboard),
        log: Box::new(ConsoleLog),
        notifier: Box::new(ConsoleNotifier),
        power: Box::new(MainsPower),
        state_store: None,
    };

    let config = SchedulerConfig {
        cycle_interval: Duration::from_secs(1),
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(
        config,
        sensors,
        collaborators,
        AlertDispatcher::new(ReNotify::AfterCycles(3)),
    )?;

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        println!("\n-- stopping --");
        stop.stop();
    });

    let reason = scheduler.run().await;
    println!("\nLoop ended: {reason}");
    Ok(())
}
