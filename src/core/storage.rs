//! Persistence of successful readings
//!
//! Every sink implements [`StorageSink`]. [`RetryingStorage`] wraps another
//! sink and keeps records whose save failed for later attempts.

use crate::core::sensor::Reading;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default number of attempts before a queued record is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default capacity of the retry queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Backend refused the record
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// One stored measurement
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Capture time
    pub timestamp: DateTime<Local>,
    /// Sensor name
    pub sensor_name: String,
    /// Slave address
    pub slave_id: u8,
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
}

impl SensorRecord {
    /// Build a record from a successful reading
    pub fn from_reading(reading: &Reading) -> Option<Self> {
        let m = reading.measurement()?;
        Some(Self {
            timestamp: m.timestamp,
            sensor_name: reading.sensor_name.clone(),
            slave_id: reading.slave_id,
            temperature: m.temperature,
            humidity: m.humidity,
        })
    }

    /// Records for every successful reading, in order
    pub fn from_readings(readings: &[Reading]) -> Vec<Self> {
        readings.iter().filter_map(Self::from_reading).collect()
    }
}

/// Destination for sensor records
#[cfg_attr(test, mockall::automock)]
pub trait StorageSink: Send {
    /// Persist a single record
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError>;

    /// Persist records in order
    fn save_batch(&mut self, records: &[SensorRecord]) -> Result<(), StorageError> {
        for record in records {
            self.save(record)?;
        }
        Ok(())
    }

    /// Push buffered data to the backend
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

// ============ CSV ============

/// Default CSV file name for today, e.g. `sensor_data_20240131.csv`
pub fn default_csv_path() -> PathBuf {
    PathBuf::from(format!("sensor_data_{}.csv", Local::now().format("%Y%m%d")))
}

/// Appends records to a CSV file
pub struct CsvStorage {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvStorage {
    /// Open `path` for appending; the header is written only to a new or empty file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        info!(path = %path.display(), header = needs_header, "CSV storage opened");
        Ok(Self { path, writer })
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageSink for CsvStorage {
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError> {
        self.writer.serialize(record)?;
        Ok(())
    }

    fn save_batch(&mut self, records: &[SensorRecord]) -> Result<(), StorageError> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

// ============ JSON Lines ============

/// Appends one JSON object per line
pub struct JsonLinesStorage {
    path: PathBuf,
    writer: std::io::BufWriter<File>,
}

impl JsonLinesStorage {
    /// Open `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "JSON lines storage opened");
        Ok(Self {
            path,
            writer: std::io::BufWriter::new(file),
        })
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageSink for JsonLinesStorage {
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError> {
        use std::io::Write;
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn save_batch(&mut self, records: &[SensorRecord]) -> Result<(), StorageError> {
        for record in records {
            self.save(record)?;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        use std::io::Write;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

// ============ SQLite ============

/// Default SQLite database file
pub const DEFAULT_SQLITE_PATH: &str = "sensor_data.db";

const SQLITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sensor_data (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    name TEXT NOT NULL, \
    slave_id INTEGER NOT NULL, \
    temperature REAL NOT NULL, \
    humidity REAL NOT NULL, \
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP)";

const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_timestamp ON sensor_data(timestamp)";

const INSERT_RECORD: &str = "INSERT INTO sensor_data \
    (name, slave_id, temperature, humidity, timestamp) VALUES (?, ?, ?, ?, ?)";

/// Inserts records into the `sensor_data` table of a SQLite database
///
/// The pool belongs to the runtime that opened it. Saving blocks on that
/// runtime, so sink calls must come from outside async context, e.g. from
/// `spawn_blocking` as the poller does.
pub struct SqliteStorage {
    path: PathBuf,
    pool: SqlitePool,
    runtime: tokio::runtime::Handle,
}

impl SqliteStorage {
    /// Open or create the database at `path` and make sure the schema exists
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;

        info!(path = %path.display(), "SQLite storage opened");
        Ok(Self {
            path,
            pool,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn insert(pool: &SqlitePool, records: &[SensorRecord]) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        for record in records {
            sqlx::query(INSERT_RECORD)
                .bind(record.sensor_name.as_str())
                .bind(i64::from(record.slave_id))
                .bind(record.temperature)
                .bind(record.humidity)
                .bind(record.timestamp.format(SQLITE_TIME_FORMAT).to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}

impl StorageSink for SqliteStorage {
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError> {
        self.save_batch(std::slice::from_ref(record))
    }

    fn save_batch(&mut self, records: &[SensorRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        self.runtime.block_on(Self::insert(&self.pool, records))?;
        Ok(())
    }

    // Every batch commits its own transaction
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============ Memory ============

/// Keeps records in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<Vec<SensorRecord>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records
    pub fn records(&self) -> Vec<SensorRecord> {
        self.records.lock().clone()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl StorageSink for MemoryStorage {
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============ Retry ============

#[derive(Debug)]
struct Pending {
    record: SensorRecord,
    attempts: u32,
}

/// Wraps a sink and retries records whose save failed
///
/// Queued records are retried before new ones on every batch. A record is
/// dropped after `max_retries` failed attempts, and the oldest queued record
/// is dropped when the queue is full. When the final flush of a batch fails
/// the whole batch is queued again, so a record may reach the backend twice.
pub struct RetryingStorage {
    inner: Box<dyn StorageSink>,
    queue: VecDeque<Pending>,
    max_retries: u32,
    capacity: usize,
    dropped: u64,
}

impl RetryingStorage {
    /// Wrap `inner` with the default limits
    pub fn new(inner: Box<dyn StorageSink>) -> Self {
        Self {
            inner,
            queue: VecDeque::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            capacity: DEFAULT_QUEUE_CAPACITY,
            dropped: 0,
        }
    }

    /// Attempts before a record is dropped
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Maximum number of queued records
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Records waiting for another attempt
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Records given up on so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn enqueue(&mut self, record: SensorRecord, attempts: u32) {
        if attempts >= self.max_retries {
            warn!(
                sensor = %record.sensor_name,
                attempts,
                "dropping record after repeated storage failures"
            );
            self.dropped += 1;
            return;
        }
        if self.queue.len() >= self.capacity {
            if let Some(old) = self.queue.pop_front() {
                warn!(sensor = %old.record.sensor_name, "retry queue full, dropping oldest record");
                self.dropped += 1;
            }
        }
        self.queue.push_back(Pending { record, attempts });
    }
}

impl StorageSink for RetryingStorage {
    fn save(&mut self, record: &SensorRecord) -> Result<(), StorageError> {
        self.save_batch(std::slice::from_ref(record))
    }

    fn save_batch(&mut self, records: &[SensorRecord]) -> Result<(), StorageError> {
        let mut batch: Vec<Pending> = self.queue.drain(..).collect();
        if !batch.is_empty() {
            debug!(count = batch.len(), "retrying queued records");
        }
        batch.extend(records.iter().cloned().map(|record| Pending { record, attempts: 0 }));

        let mut failed = Vec::with_capacity(batch.len());
        let mut last_error = None;
        for pending in &batch {
            match self.inner.save(&pending.record) {
                Ok(()) => failed.push(false),
                Err(e) => {
                    debug!(sensor = %pending.record.sensor_name, error = %e, "save failed");
                    failed.push(true);
                    // Retries report through the queue, not the caller
                    if pending.attempts == 0 {
                        last_error = Some(e);
                    }
                }
            }
        }

        let flush_error = self.inner.flush().err();
        if let Some(e) = &flush_error {
            warn!(count = batch.len(), error = %e, "flush failed, queueing batch again");
        }

        let requeue_all = flush_error.is_some();
        for (pending, failed) in batch.into_iter().zip(failed) {
            if failed || requeue_all {
                self.enqueue(pending.record, pending.attempts + 1);
            }
        }

        match flush_error.or(last_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.save_batch(&[])
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============ Configuration ============

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Do not store readings
    None,
    /// CSV file
    #[default]
    Csv,
    /// JSON lines file
    Jsonl,
    /// SQLite database
    Sqlite,
}

/// `[storage]` configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Target file; CSV defaults to `sensor_data_YYYYMMDD.csv`, SQLite to `sensor_data.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Attempts before a failed record is dropped (0 disables retrying)
    pub max_retries: u32,
    /// Maximum number of records waiting for a retry
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Csv,
            path: None,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl StorageConfig {
    /// File the backend writes to, if any
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.kind {
            StorageKind::None => None,
            StorageKind::Csv => Some(self.path.clone().unwrap_or_else(default_csv_path)),
            StorageKind::Jsonl => Some(
                self.path
                    .clone()
                    .unwrap_or_else(|| default_csv_path().with_extension("jsonl")),
            ),
            StorageKind::Sqlite => Some(
                self.path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH)),
            ),
        }
    }
}

/// Create the sink described by `config`, or `None` when storage is disabled
pub async fn build_storage(
    config: &StorageConfig,
) -> Result<Option<Box<dyn StorageSink>>, StorageError> {
    let Some(path) = config.resolved_path() else {
        info!("storage disabled");
        return Ok(None);
    };

    let sink: Box<dyn StorageSink> = match config.kind {
        StorageKind::Csv => Box::new(CsvStorage::open(&path)?),
        StorageKind::Jsonl => Box::new(JsonLinesStorage::open(&path)?),
        StorageKind::Sqlite => Box::new(SqliteStorage::connect(&path).await?),
        StorageKind::None => return Ok(None),
    };

    if config.max_retries == 0 {
        return Ok(Some(sink));
    }

    Ok(Some(Box::new(
        RetryingStorage::new(sink)
            .max_retries(config.max_retries)
            .capacity(config.queue_capacity),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensor::{Measurement, ReadError};
    use mockall::Sequence;

    fn record(name: &str, temperature: f64) -> SensorRecord {
        SensorRecord {
            timestamp: Local::now(),
            sensor_name: name.to_string(),
            slave_id: 1,
            temperature,
            humidity: 50.0,
        }
    }

    #[test]
    fn test_records_only_from_successes() {
        let readings = vec![
            Reading::ok(
                "a",
                1,
                Measurement {
                    temperature: 21.5,
                    humidity: 40.0,
                    timestamp: Local::now(),
                },
            ),
            Reading::failed("b", 2, ReadError::PortNotOpen("p".into())),
        ];
        let records = SensorRecord::from_readings(&readings);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_name, "a");
        assert_eq!(records[0].temperature, 21.5);
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");

        {
            let mut sink = CsvStorage::open(&path).unwrap();
            sink.save_batch(&[record("a", 20.0)]).unwrap();
        }
        {
            let mut sink = CsvStorage::open(&path).unwrap();
            sink.save_batch(&[record("b", 21.0), record("c", 22.0)]).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,sensor_name,slave_id,temperature,humidity");
        assert_eq!(content.matches("sensor_name").count(), 1);
        assert!(lines[2].contains(",b,1,21.0,50.0"));
    }

    #[test]
    fn test_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut sink = CsvStorage::open(&path).unwrap();
        sink.save_batch(&[record("a", 20.5)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<SensorRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temperature, 20.5);
    }

    #[test]
    fn test_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        let mut sink = JsonLinesStorage::open(&path).unwrap();
        sink.save_batch(&[record("a", 1.0), record("b", 2.0)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<SensorRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].sensor_name, "b");
    }

    #[test]
    fn test_memory_clones_share_buffer() {
        let store = MemoryStorage::new();
        let mut sink = store.clone();
        sink.save(&record("a", 1.0)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retry_replays_before_new_records() {
        let mut inner = MockStorageSink::new();
        let mut seq = Sequence::new();
        inner
            .expect_save()
            .withf(|r| r.sensor_name == "first")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(StorageError::Unavailable("down".into())));
        inner.expect_flush().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        inner
            .expect_save()
            .withf(|r| r.sensor_name == "first")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        inner
            .expect_save()
            .withf(|r| r.sensor_name == "second")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        inner.expect_flush().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let mut sink = RetryingStorage::new(Box::new(inner));
        assert!(sink.save_batch(&[record("first", 1.0)]).is_err());
        assert_eq!(sink.pending(), 1);
        sink.save_batch(&[record("second", 2.0)]).unwrap();
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_retry_gives_up() {
        let mut inner = MockStorageSink::new();
        inner
            .expect_save()
            .times(3)
            .returning(|_| Err(StorageError::Unavailable("down".into())));
        inner.expect_flush().returning(|| Ok(()));

        let mut sink = RetryingStorage::new(Box::new(inner)).max_retries(3);
        assert!(sink.save_batch(&[record("a", 1.0)]).is_err());
        sink.save_batch(&[]).unwrap();
        assert_eq!(sink.pending(), 1);
        sink.save_batch(&[]).unwrap();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_flush_failure_queues_batch() {
        let mut inner = MockStorageSink::new();
        let mut seq = Sequence::new();
        inner
            .expect_save()
            .withf(|r| r.sensor_name == "a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        inner
            .expect_flush()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(StorageError::Io(std::io::Error::other("disk full"))));
        inner
            .expect_save()
            .withf(|r| r.sensor_name == "a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        inner.expect_flush().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let mut sink = RetryingStorage::new(Box::new(inner));
        assert!(matches!(sink.save_batch(&[record("a", 1.0)]), Err(StorageError::Io(_))));
        assert_eq!(sink.pending(), 1);
        sink.flush().unwrap();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_retry_queue_bounded() {
        let mut inner = MockStorageSink::new();
        inner
            .expect_save()
            .returning(|_| Err(StorageError::Unavailable("down".into())));
        inner.expect_flush().returning(|| Ok(()));

        let mut sink = RetryingStorage::new(Box::new(inner)).capacity(2);
        let _ = sink.save_batch(&[record("a", 1.0), record("b", 2.0), record("c", 3.0)]);
        assert_eq!(sink.pending(), 2);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_storage_config_toml() {
        let cfg: StorageConfig = toml::from_str("type = \"jsonl\"\npath = \"out.jsonl\"").unwrap();
        assert_eq!(cfg.kind, StorageKind::Jsonl);
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.resolved_path(), Some(PathBuf::from("out.jsonl")));

        let cfg: StorageConfig = toml::from_str("type = \"sqlite\"").unwrap();
        assert_eq!(cfg.kind, StorageKind::Sqlite);
        assert_eq!(cfg.resolved_path(), Some(PathBuf::from(DEFAULT_SQLITE_PATH)));

        assert!(toml::from_str::<StorageConfig>("type = \"influxdb\"").is_err());
    }

    #[tokio::test]
    async fn test_build_storage() {
        let dir = tempfile::tempdir().unwrap();
        let none = StorageConfig {
            kind: StorageKind::None,
            ..StorageConfig::default()
        };
        assert!(build_storage(&none).await.unwrap().is_none());

        let csv = StorageConfig {
            path: Some(dir.path().join("x.csv")),
            ..StorageConfig::default()
        };
        let sink = build_storage(&csv).await.unwrap().unwrap();
        assert_eq!(sink.name(), "csv");

        let sqlite = StorageConfig {
            kind: StorageKind::Sqlite,
            path: Some(dir.path().join("x.db")),
            ..StorageConfig::default()
        };
        let sink = build_storage(&sqlite).await.unwrap().unwrap();
        assert_eq!(sink.name(), "sqlite");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_schema_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteStorage::connect(dir.path().join("data.db")).await.unwrap();

        let sink = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            sink.save_batch(&[record("a", 21.5), record("b", 22.0)]).unwrap();
            sink.save(&record("c", 23.0)).unwrap();
            sink.flush().unwrap();
            sink
        })
        .await
        .unwrap();

        let rows: Vec<(String, i64, f64, f64, String)> = sqlx::query_as(
            "SELECT name, slave_id, temperature, humidity, CAST(timestamp AS TEXT) \
             FROM sensor_data ORDER BY id",
        )
        .fetch_all(&sink.pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, "a");
        assert_eq!(rows[0].1, 1);
        assert_eq!(rows[1].2, 22.0);
        assert_eq!(rows[2].3, 50.0);
        assert_eq!(rows[0].4.len(), "YYYY-MM-DD HH:MM:SS".len());

        let index: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'idx_timestamp'",
        )
        .fetch_optional(&sink.pool)
        .await
        .unwrap();
        assert!(index.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("data.db");
        assert!(matches!(
            SqliteStorage::connect(&path).await,
            Err(StorageError::Sqlite(_))
        ));
    }

    #[test]
    fn test_default_csv_name() {
        let name = default_csv_path().display().to_string();
        assert!(name.starts_with("sensor_data_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "sensor_data_YYYYMMDD.csv".len());
    }
}
