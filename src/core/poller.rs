//! Periodic polling driver
//!
//! Runs one cycle per interval: poll every sensor, log the results, store
//! the successes. Serial I/O and storage are blocking, so each cycle runs on
//! the blocking pool. Stopping is cooperative through a [`CancellationToken`].

use crate::core::multi_port::MultiPortReader;
use crate::core::sensor::{Reading, SensorDescriptor};
use crate::core::storage::{SensorRecord, StorageSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type SharedSink = Arc<Mutex<Box<dyn StorageSink>>>;

/// Poller error types
#[derive(Error, Debug)]
pub enum PollError {
    /// Blocking worker panicked or was cancelled
    #[error("poll worker failed: {0}")]
    Worker(String),
}

/// Outcome of one polling cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// One reading per configured sensor, in order
    pub readings: Vec<Reading>,
    /// Records handed to storage
    pub stored: usize,
    /// Storage failure message, if the save failed
    pub storage_error: Option<String>,
}

impl CycleReport {
    /// Successful readings in this cycle
    pub fn successes(&self) -> usize {
        self.readings.iter().filter(|r| r.success()).count()
    }

    /// Failed readings in this cycle
    pub fn failures(&self) -> usize {
        self.readings.len() - self.successes()
    }
}

/// Events published while polling
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A cycle finished
    CycleCompleted(CycleReport),
    /// Storage rejected a cycle's records
    StorageFailed {
        /// Cycle number
        cycle: u64,
        /// Error message
        error: String,
    },
}

/// Totals over a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Completed cycles
    pub cycles: u64,
    /// Successful readings
    pub successes: u64,
    /// Failed readings
    pub failures: u64,
    /// Cycles whose storage save failed
    pub storage_failures: u64,
}

impl PollSummary {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.successes += report.successes() as u64;
        self.failures += report.failures() as u64;
        if report.storage_error.is_some() {
            self.storage_failures += 1;
        }
    }
}

/// Drives a [`MultiPortReader`] on a fixed interval
pub struct Poller {
    reader: Arc<Mutex<MultiPortReader>>,
    sensors: Arc<Vec<SensorDescriptor>>,
    interval: Duration,
    storage: Option<SharedSink>,
    event_tx: broadcast::Sender<PollEvent>,
    cycle: u64,
}

impl Poller {
    /// Create a poller; ports should already be connected
    pub fn new(
        reader: MultiPortReader,
        sensors: Vec<SensorDescriptor>,
        interval: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            sensors: Arc::new(sensors),
            interval,
            storage: None,
            event_tx,
            cycle: 0,
        }
    }

    /// Store successful readings in `sink`
    #[must_use]
    pub fn with_storage(mut self, sink: Box<dyn StorageSink>) -> Self {
        self.storage = Some(Arc::new(Mutex::new(sink)));
        self
    }

    /// Subscribe to poll events
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.event_tx.subscribe()
    }

    /// Shared handle to the underlying reader
    pub fn reader(&self) -> Arc<Mutex<MultiPortReader>> {
        self.reader.clone()
    }

    /// Cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Run one polling cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PollError> {
        self.cycle += 1;
        let cycle = self.cycle;
        let reader = self.reader.clone();
        let sensors = self.sensors.clone();
        let storage = self.storage.clone();

        let report = tokio::task::spawn_blocking(move || {
            poll_once(cycle, &reader, &sensors, storage.as_ref())
        })
        .await
        .map_err(|e| PollError::Worker(e.to_string()))?;

        if let Some(error) = &report.storage_error {
            let _ = self.event_tx.send(PollEvent::StorageFailed {
                cycle,
                error: error.clone(),
            });
        }
        let _ = self.event_tx.send(PollEvent::CycleCompleted(report.clone()));

        Ok(report)
    }

    /// Poll until `token` is cancelled, then close ports and flush storage
    pub async fn run(&mut self, token: CancellationToken) -> PollSummary {
        info!(
            sensors = self.sensors.len(),
            interval_ms = self.interval.as_millis() as u64,
            "polling started"
        );

        let mut summary = PollSummary::default();

        while !token.is_cancelled() {
            match self.run_cycle().await {
                Ok(report) => summary.record(&report),
                Err(e) => error!(error = %e, "polling cycle aborted"),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            cycles = summary.cycles,
            successes = summary.successes,
            failures = summary.failures,
            "polling stopped"
        );
        self.shutdown().await;
        summary
    }

    /// Close every port and flush storage
    pub async fn shutdown(&self) {
        let reader = self.reader.clone();
        let storage = self.storage.clone();

        let result = tokio::task::spawn_blocking(move || {
            reader.lock().disconnect_all();
            if let Some(sink) = storage {
                let mut sink = sink.lock();
                if let Err(e) = sink.flush() {
                    error!(storage = sink.name(), error = %e, "final storage flush failed");
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!(error = %e, "shutdown worker failed");
        }
    }
}

fn poll_once(
    cycle: u64,
    reader: &Mutex<MultiPortReader>,
    sensors: &[SensorDescriptor],
    storage: Option<&SharedSink>,
) -> CycleReport {
    let readings = reader.lock().read_all_sensors(sensors);

    for reading in &readings {
        match &reading.outcome {
            Ok(m) => info!(
                sensor = %reading.sensor_name,
                slave_id = reading.slave_id,
                temperature = m.temperature,
                humidity = m.humidity,
                "reading"
            ),
            Err(e) => warn!(
                sensor = %reading.sensor_name,
                slave_id = reading.slave_id,
                error = %e,
                "reading failed"
            ),
        }
    }

    let records = SensorRecord::from_readings(&readings);
    let mut stored = 0;
    let mut storage_error = None;

    if let Some(sink) = storage {
        if !records.is_empty() {
            let mut sink = sink.lock();
            match sink.save_batch(&records) {
                Ok(()) => {
                    stored = records.len();
                    debug!(storage = sink.name(), count = stored, "records stored");
                }
                Err(e) => {
                    error!(storage = sink.name(), error = %e, "failed to store readings");
                    storage_error = Some(e.to_string());
                }
            }
        }
    }

    CycleReport {
        cycle,
        readings,
        stored,
        storage_error,
    }
}
