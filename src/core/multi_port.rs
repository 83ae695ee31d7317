//! Registry of named serial ports and per-cycle sensor fan-out
//!
//! Ports move through `Registered -> Open -> Closed`. A port that fails to
//! open stays `Registered`; `Closed` is terminal.

use crate::config::PortConfig;
use crate::core::sensor::{ReadError, Reading, SensorDescriptor, SensorReader};
use crate::core::transport::{
    Connector, ExchangeTiming, SerialConfig, SystemConnector, TransportError, TransportStats,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Maximum number of ports per reader
pub const MAX_PORTS: usize = 16;

/// Lifecycle of a registered port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Added but not (successfully) opened
    Registered,
    /// Open and usable
    Open,
    /// Closed for good
    Closed,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a port could not be registered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Name already taken
    #[error("duplicate port name: {0}")]
    DuplicateName(String),

    /// Registry is full
    #[error("too many ports: at most {MAX_PORTS} are supported")]
    CapacityExceeded,
}

struct PortEntry {
    name: String,
    reader: SensorReader,
    state: PortState,
}

/// Owns every port's [`SensorReader`] and polls sensors across them
pub struct MultiPortReader {
    ports: Vec<PortEntry>,
    index: HashMap<String, usize>,
    connector: Arc<dyn Connector>,
    timing: ExchangeTiming,
}

impl MultiPortReader {
    /// Create an empty reader backed by real serial devices
    pub fn new() -> Self {
        Self::with_connector(Arc::new(SystemConnector))
    }

    /// Create an empty reader that opens ports through `connector`
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            ports: Vec::new(),
            index: HashMap::new(),
            connector,
            timing: ExchangeTiming::default(),
        }
    }

    /// Exchange delays for ports added after this call
    #[must_use]
    pub fn with_timing(mut self, timing: ExchangeTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Register a port under a unique name
    ///
    /// Rejected additions leave the registry untouched.
    pub fn add_port(&mut self, name: &str, config: SerialConfig) -> Result<(), RegistryError> {
        if self.index.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if self.ports.len() >= MAX_PORTS {
            return Err(RegistryError::CapacityExceeded);
        }

        let reader = SensorReader::new(config, self.connector.clone()).with_timing(self.timing);
        self.index.insert(name.to_string(), self.ports.len());
        self.ports.push(PortEntry {
            name: name.to_string(),
            reader,
            state: PortState::Registered,
        });
        Ok(())
    }

    /// Build a reader for real devices from port configuration
    pub fn from_config(ports: &[PortConfig]) -> Result<Self, RegistryError> {
        let mut reader = Self::new();
        reader.add_ports(ports)?;
        Ok(reader)
    }

    /// Register every configured port in order
    pub fn add_ports(&mut self, ports: &[PortConfig]) -> Result<(), RegistryError> {
        for port in ports {
            self.add_port(&port.name, port.to_serial_config())?;
        }
        Ok(())
    }

    /// Open every registered port independently
    ///
    /// Returns `true` if at least one port is open afterwards.
    pub fn connect_all(&mut self) -> bool {
        let mut opened = 0usize;

        for entry in &mut self.ports {
            match entry.state {
                PortState::Open => opened += 1,
                PortState::Closed => {}
                PortState::Registered => match entry.reader.connect() {
                    Ok(()) => {
                        entry.state = PortState::Open;
                        opened += 1;
                        info!(
                            port = %entry.name,
                            device = %entry.reader.config(),
                            "port connected"
                        );
                    }
                    Err(e) => {
                        warn!(
                            port = %entry.name,
                            device = %entry.reader.config().port,
                            error = %e,
                            "failed to open port"
                        );
                    }
                },
            }
        }

        info!(opened, total = self.ports.len(), "port connection pass finished");
        opened > 0
    }

    /// Open a single registered port
    pub fn connect(&mut self, name: &str) -> Result<(), TransportError> {
        let entry = self
            .entry_mut(name)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        match entry.state {
            PortState::Open => Ok(()),
            PortState::Closed => Err(TransportError::NotConnected),
            PortState::Registered => {
                entry.reader.connect()?;
                entry.state = PortState::Open;
                Ok(())
            }
        }
    }

    /// Close one port; unknown names and repeated calls are no-ops
    pub fn close(&mut self, name: &str) {
        if let Some(entry) = self.entry_mut(name) {
            entry.reader.disconnect();
            if entry.state != PortState::Closed {
                info!(port = %entry.name, "port closed");
            }
            entry.state = PortState::Closed;
        }
    }

    /// Close every port
    pub fn disconnect_all(&mut self) {
        for entry in &mut self.ports {
            entry.reader.disconnect();
            entry.state = PortState::Closed;
        }
    }

    /// Poll every sensor in order; one reading per descriptor
    pub fn read_all_sensors(&mut self, sensors: &[SensorDescriptor]) -> Vec<Reading> {
        sensors.iter().map(|sensor| self.read_sensor(sensor)).collect()
    }

    /// Poll one sensor on the port it names
    pub fn read_sensor(&mut self, sensor: &SensorDescriptor) -> Reading {
        let Some(&idx) = self.index.get(&sensor.port) else {
            return Reading::failed(
                &sensor.name,
                sensor.slave_id,
                ReadError::PortNotFound(sensor.port.clone()),
            );
        };

        let entry = &mut self.ports[idx];
        if entry.state != PortState::Open {
            return Reading::failed(
                &sensor.name,
                sensor.slave_id,
                ReadError::PortNotOpen(sensor.port.clone()),
            );
        }

        entry.reader.read_descriptor(sensor)
    }

    /// State of a port, if registered
    pub fn port_state(&self, name: &str) -> Option<PortState> {
        self.index.get(name).map(|&idx| self.ports[idx].state)
    }

    /// Line configuration of a port, if registered
    pub fn port_config(&self, name: &str) -> Option<&SerialConfig> {
        self.index.get(name).map(|&idx| self.ports[idx].reader.config())
    }

    /// Channel statistics of a port, if registered
    pub fn port_stats(&self, name: &str) -> Option<TransportStats> {
        self.index.get(name).map(|&idx| self.ports[idx].reader.stats())
    }

    /// Port names in registration order
    pub fn port_names(&self) -> Vec<&str> {
        self.ports.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered ports
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Number of open ports
    pub fn open_count(&self) -> usize {
        self.ports.iter().filter(|e| e.state == PortState::Open).count()
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut PortEntry> {
        let idx = *self.index.get(name)?;
        self.ports.get_mut(idx)
    }
}

impl Default for MultiPortReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MultiPortReader {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl fmt::Debug for MultiPortReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for entry in &self.ports {
            list.entry(&entry.name, &entry.state);
        }
        list.finish()
    }
}
