//! # thpoll Core Library
//!
//! Polls temperature/humidity sensors over Modbus RTU on one or more
//! serial lines (RS-485/RS-232, USB-Serial adapters).
//!
//! ## Features
//!
//! - Up to 16 named serial ports, each opened independently
//! - Function 0x03 requests with CRC-16/MODBUS validation
//! - Every poll yields a reading, successful or with a typed error
//! - SQLite, CSV and JSON-lines storage with a retry queue
//! - Interval driver with cooperative cancellation
//! - Simulated RTU bus for tests and hardware-free runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use thpoll_core::{MultiPortReader, SensorDescriptor, SerialConfig};
//!
//! let mut reader = MultiPortReader::new();
//! reader.add_port("bus1", SerialConfig::new("/dev/ttyUSB0", 9600))?;
//!
//! if reader.connect_all() {
//!     let sensors = vec![SensorDescriptor::new("room", "bus1", 1)];
//!     for reading in reader.read_all_sensors(&sensors) {
//!         match reading.temperature() {
//!             Some(t) => println!("{}: {t:.1} °C", reading.sensor_name),
//!             None => println!("{}: {:?}", reading.sensor_name, reading.error()),
//!         }
//!     }
//! }
//! # Ok::<(), thpoll_core::RegistryError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError, LoggingConfig, PortConfig};
pub use crate::core::multi_port::{MultiPortReader, PortState, RegistryError, MAX_PORTS};
pub use crate::core::poller::{CycleReport, PollEvent, PollSummary, Poller};
pub use crate::core::protocol::{crc16_modbus, FrameError};
pub use crate::core::sensor::{Measurement, ReadError, Reading, SensorDescriptor, SensorReader};
pub use crate::core::simulator::{Fault, SimulatedBus, VirtualSensor};
pub use crate::core::storage::{
    build_storage, CsvStorage, JsonLinesStorage, MemoryStorage, RetryingStorage, SensorRecord,
    SqliteStorage, StorageConfig, StorageError, StorageKind, StorageSink,
};
pub use crate::core::transport::{
    Connector, ExchangeTiming, SerialChannel, SerialConfig, SerialParity, SystemConnector,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
