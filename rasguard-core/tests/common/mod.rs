//! Mock collaborators for scheduler integration tests
//!
//! Every mock records what it was asked to do behind an `Arc<Mutex<..>>` so
//! the test keeps a handle after the mock has been boxed into the scheduler.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use rasguard_core::{
    Collaborators, CollaboratorError, CycleLog, CycleResult, DispatchState, DispatchStateStore,
    FilteredReading, Notification, Notifier, PowerSource, RawReader, SchedulerConfig, SensorError,
    SensorSpec, StopHandle, TelemetryPublisher, ThresholdRule, Timeouts,
};

pub type Shared<T> = Arc<Mutex<T>>;

/// Sensor spec without sample spacing so paused-clock tests stay exact
pub fn spec(id: &str, count: usize, discard: usize, rule: ThresholdRule) -> SensorSpec {
    SensorSpec::builder(id)
        .samples(count, discard)
        .sample_spacing(Duration::ZERO)
        .thresholds(rule)
        .build()
        .unwrap()
}

pub fn config(interval_secs: u64) -> SchedulerConfig {
    SchedulerConfig {
        cycle_interval: Duration::from_secs(interval_secs),
        battery_shutdown_percent: 10.0,
        battery_warning_percent: Some(20.0),
        timeouts: Timeouts {
            read: Duration::from_secs(2),
            publish: Duration::from_secs(30),
            log: Duration::from_secs(1000),
            notify: Duration::from_secs(30),
            power: Duration::from_secs(5),
        },
    }
}

/// Counts `release()` calls, shared by every mock of one test
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter(Arc<AtomicUsize>);

impl ReleaseCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Requests a stop once a counter (cycles logged, reads made) reaches a mark
#[derive(Clone, Default)]
pub struct StopAfter {
    slot: Shared<Option<(usize, StopHandle)>>,
}

impl StopAfter {
    pub fn arm(&self, mark: usize, handle: StopHandle) {
        *self.slot.lock().unwrap() = Some((mark, handle));
    }

    fn tick(&self, count: usize) {
        if let Some((mark, handle)) = self.slot.lock().unwrap().as_ref() {
            if count >= *mark {
                handle.stop();
            }
        }
    }
}

/// Replays scripted read results, then repeats `fallback`
pub struct ScriptedReader {
    script: VecDeque<Result<f64, SensorError>>,
    fallback: f64,
    reads: Shared<Vec<Instant>>,
    stop_after: StopAfter,
    released: ReleaseCounter,
}

impl ScriptedReader {
    pub fn constant(value: f64) -> Self {
        Self::script(Vec::new(), value)
    }

    pub fn script(script: impl IntoIterator<Item = Result<f64, SensorError>>, fallback: f64) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            reads: Shared::default(),
            stop_after: StopAfter::default(),
            released: ReleaseCounter::default(),
        }
    }

    /// Arm the returned handle to request a stop after a number of reads
    pub fn stop_after(&self) -> StopAfter {
        self.stop_after.clone()
    }

    pub fn with_release(mut self, counter: &ReleaseCounter) -> Self {
        self.released = counter.clone();
        self
    }

    /// Instants at which reads happened
    pub fn reads(&self) -> Shared<Vec<Instant>> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl RawReader for ScriptedReader {
    async fn read(&mut self) -> Result<f64, SensorError> {
        let count = {
            let mut reads = self.reads.lock().unwrap();
            reads.push(Instant::now());
            reads.len()
        };
        self.stop_after.tick(count);
        self.script.pop_front().unwrap_or(Ok(self.fallback))
    }

    fn release(&mut self) {
        self.released.hit();
    }
}

/// A device that never answers
#[derive(Default)]
pub struct HangingReader {
    pub attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl RawReader for HangingReader {
    async fn read(&mut self) -> Result<f64, SensorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Shared<Vec<FilteredReading>>,
    /// Sensor ids whose publish fails
    pub fail_for: Vec<String>,
    /// Sensor ids whose publish never completes
    pub hang_for: Vec<String>,
    released: ReleaseCounter,
}

#[async_trait]
impl TelemetryPublisher for RecordingPublisher {
    async fn publish(&mut self, reading: &FilteredReading) -> Result<(), CollaboratorError> {
        if self.hang_for.iter().any(|id| id == reading.sensor.as_str()) {
            std::future::pending::<()>().await;
        }
        if self.fail_for.iter().any(|id| id == reading.sensor.as_str()) {
            return Err(CollaboratorError::Rejected {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.published.lock().unwrap().push(reading.clone());
        Ok(())
    }

    fn release(&mut self) {
        self.released.hit();
    }
}

#[derive(Default)]
pub struct RecordingLog {
    pub cycles: Shared<Vec<CycleResult>>,
    pub backups: Arc<AtomicUsize>,
    /// Extra time spent in successive appends
    pub delays: VecDeque<Duration>,
    /// Number of appends that fail before appends start succeeding
    pub failures: usize,
    pub append_attempts: Arc<AtomicUsize>,
    pub stop_after: StopAfter,
    released: ReleaseCounter,
}

#[async_trait]
impl CycleLog for RecordingLog {
    async fn append(&mut self, result: &CycleResult) -> Result<(), CollaboratorError> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.pop_front() {
            tokio::time::sleep(delay).await;
        }
        if self.failures > 0 {
            self.failures -= 1;
            return Err(CollaboratorError::Io("disk full".into()));
        }
        let logged = {
            let mut cycles = self.cycles.lock().unwrap();
            cycles.push(result.clone());
            cycles.len()
        };
        self.stop_after.tick(logged);
        Ok(())
    }

    async fn backup(&mut self) -> Result<(), CollaboratorError> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        self.released.hit();
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Shared<Vec<Notification>>,
    pub attempts: Arc<AtomicUsize>,
    /// Number of sends that fail before sends start succeeding
    pub failures: usize,
    released: ReleaseCounter,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&mut self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures > 0 {
            self.failures -= 1;
            return Err(CollaboratorError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn release(&mut self) {
        self.released.hit();
    }
}

/// Replays battery levels, then repeats `fallback`
#[derive(Default)]
pub struct ScriptedPower {
    pub levels: VecDeque<Option<f64>>,
    pub fallback: Option<f64>,
    released: ReleaseCounter,
}

#[async_trait]
impl PowerSource for ScriptedPower {
    async fn battery_percent(&mut self) -> Option<f64> {
        self.levels.pop_front().unwrap_or(self.fallback)
    }

    fn release(&mut self) {
        self.released.hit();
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Shared<Option<DispatchState>>,
    pub saves: Arc<AtomicUsize>,
}

#[async_trait]
impl DispatchStateStore for MemoryStore {
    async fn load(&mut self) -> Result<Option<DispatchState>, CollaboratorError> {
        Ok(self.saved.lock().unwrap().clone())
    }

    async fn save(&mut self, state: &DispatchState) -> Result<(), CollaboratorError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.saved.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

/// The four mandatory collaborators plus an optional store
#[derive(Default)]
pub struct Mocks {
    pub publisher: RecordingPublisher,
    pub log: RecordingLog,
    pub notifier: RecordingNotifier,
    pub power: ScriptedPower,
    pub store: Option<MemoryStore>,
    pub releases: ReleaseCounter,
}

impl Mocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_collaborators(mut self) -> Collaborators {
        self.publisher.released = self.releases.clone();
        self.log.released = self.releases.clone();
        self.notifier.released = self.releases.clone();
        self.power.released = self.releases.clone();

        Collaborators {
            publisher: Box::new(self.publisher),
            log: Box::new(self.log),
            notifier: Box::new(self.notifier),
            power: Box::new(self.power),
            state_store: self
                .store
                .map(|store| Box::new(store) as Box<dyn DispatchStateStore>),
        }
    }
}
