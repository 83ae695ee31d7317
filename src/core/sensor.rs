//! Sensor descriptors, readings, and the per-port sensor reader
//!
//! A [`SensorReader`] binds one [`SerialChannel`] to the RTU frame codec.
//! Every outcome of a poll, good or bad, comes back as a [`Reading`].

use crate::core::protocol::{self, FrameError};
use crate::core::transport::{
    Connector, ExchangeTiming, SerialChannel, SerialConfig, TransportError, TransportStats,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

fn default_temp_reg() -> u16 {
    0
}

fn default_humi_reg() -> u16 {
    1
}

fn default_scale() -> f64 {
    0.1
}

/// One sensor to poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Sensor name
    pub name: String,
    /// Name of the port the sensor is wired to
    pub port: String,
    /// Modbus slave address
    pub slave_id: u8,
    /// Temperature register (start of the four-register block)
    #[serde(default = "default_temp_reg")]
    pub temp_reg: u16,
    /// Humidity register; expected to be `temp_reg + 1`
    #[serde(default = "default_humi_reg")]
    pub humi_reg: u16,
    /// Multiplier from raw temperature to degrees
    #[serde(default = "default_scale")]
    pub temp_scale: f64,
    /// Multiplier from raw humidity to %RH
    #[serde(default = "default_scale")]
    pub humi_scale: f64,
}

impl SensorDescriptor {
    /// Create a descriptor with the usual register layout (0/1, scale 0.1)
    pub fn new(name: &str, port: &str, slave_id: u8) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            slave_id,
            temp_reg: default_temp_reg(),
            humi_reg: default_humi_reg(),
            temp_scale: default_scale(),
            humi_scale: default_scale(),
        }
    }

    /// Set both registers
    #[must_use]
    pub fn registers(mut self, temp_reg: u16, humi_reg: u16) -> Self {
        self.temp_reg = temp_reg;
        self.humi_reg = humi_reg;
        self
    }

    /// Set both scale factors
    #[must_use]
    pub fn scales(mut self, temp_scale: f64, humi_scale: f64) -> Self {
        self.temp_scale = temp_scale;
        self.humi_scale = humi_scale;
        self
    }
}

/// Why a sensor could not be read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The descriptor names a port that is not registered
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// The port exists but is not open
    #[error("port not open: {0}")]
    PortNotOpen(String),

    /// The request could not be written
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No usable reply within the wait window
    #[error("read timeout or incomplete response: {0}")]
    ReadTimeout(String),

    /// The reply failed validation
    #[error("invalid response: {0}")]
    Frame(#[from] FrameError),
}

impl From<TransportError> for ReadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::SendFailed { .. } | TransportError::WriteFailed(_) => {
                Self::SendFailed(err.to_string())
            }
            TransportError::NotConnected => Self::PortNotOpen(err.to_string()),
            other => Self::ReadTimeout(other.to_string()),
        }
    }
}

/// A successful measurement in physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Temperature (raw × scale)
    pub temperature: f64,
    /// Relative humidity (raw × scale)
    pub humidity: f64,
    /// Moment the reply was accepted
    pub timestamp: DateTime<Local>,
}

/// Result of polling one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Sensor name
    pub sensor_name: String,
    /// Slave address that was polled
    pub slave_id: u8,
    /// Measurement or the reason there is none
    pub outcome: Result<Measurement, ReadError>,
}

impl Reading {
    /// Successful reading
    pub fn ok(sensor_name: &str, slave_id: u8, measurement: Measurement) -> Self {
        Self {
            sensor_name: sensor_name.to_string(),
            slave_id,
            outcome: Ok(measurement),
        }
    }

    /// Failed reading
    pub fn failed(sensor_name: &str, slave_id: u8, error: ReadError) -> Self {
        Self {
            sensor_name: sensor_name.to_string(),
            slave_id,
            outcome: Err(error),
        }
    }

    /// Whether a valid reply was parsed
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Temperature, present only on success
    pub fn temperature(&self) -> Option<f64> {
        self.measurement().map(|m| m.temperature)
    }

    /// Humidity, present only on success
    pub fn humidity(&self) -> Option<f64> {
        self.measurement().map(|m| m.humidity)
    }

    /// Capture time, present only on success
    pub fn timestamp(&self) -> Option<DateTime<Local>> {
        self.measurement().map(|m| m.timestamp)
    }

    /// Measurement, present only on success
    pub fn measurement(&self) -> Option<&Measurement> {
        self.outcome.as_ref().ok()
    }

    /// Failure, present only on failure
    pub fn error(&self) -> Option<&ReadError> {
        self.outcome.as_ref().err()
    }
}

/// Polls sensors over one serial channel
#[derive(Debug)]
pub struct SensorReader {
    channel: SerialChannel,
    timing: ExchangeTiming,
}

impl SensorReader {
    /// Create a reader over a closed channel
    pub fn new(config: SerialConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            channel: SerialChannel::new(config, connector),
            timing: ExchangeTiming::default(),
        }
    }

    /// Override the exchange delays
    #[must_use]
    pub fn with_timing(mut self, timing: ExchangeTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Line configuration
    pub fn config(&self) -> &SerialConfig {
        self.channel.config()
    }

    /// Open the underlying channel
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.channel.open()
    }

    /// Close the underlying channel
    pub fn disconnect(&mut self) {
        self.channel.close();
    }

    /// Check if the channel is open
    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    /// Channel statistics
    pub fn stats(&self) -> TransportStats {
        self.channel.stats()
    }

    /// Poll one sensor
    ///
    /// Reads four registers from `temp_reg`; words 0 and 1 are temperature
    /// and humidity. `humi_reg` is not sent on the wire.
    pub fn read_sensor_data(
        &mut self,
        slave_id: u8,
        temp_reg: u16,
        humi_reg: u16,
        temp_scale: f64,
        humi_scale: f64,
        sensor_name: &str,
    ) -> Reading {
        if !self.channel.is_open() {
            return Reading::failed(
                sensor_name,
                slave_id,
                ReadError::PortNotOpen(self.channel.config().port.clone()),
            );
        }

        if humi_reg != temp_reg.wrapping_add(1) {
            trace!(
                sensor = sensor_name,
                temp_reg,
                humi_reg,
                "humidity register is not adjacent; using word 1 of the block"
            );
        }

        match self.exchange(slave_id, temp_reg) {
            Ok(sample) => {
                let measurement = Measurement {
                    temperature: f64::from(sample.temperature) * temp_scale,
                    humidity: f64::from(sample.humidity) * humi_scale,
                    timestamp: Local::now(),
                };
                Reading::ok(sensor_name, slave_id, measurement)
            }
            Err(err) => {
                debug!(sensor = sensor_name, slave_id, error = %err, "sensor read failed");
                Reading::failed(sensor_name, slave_id, err)
            }
        }
    }

    /// Poll the sensor a descriptor describes
    pub fn read_descriptor(&mut self, sensor: &SensorDescriptor) -> Reading {
        self.read_sensor_data(
            sensor.slave_id,
            sensor.temp_reg,
            sensor.humi_reg,
            sensor.temp_scale,
            sensor.humi_scale,
            &sensor.name,
        )
    }

    fn exchange(&mut self, slave_id: u8, temp_reg: u16) -> Result<protocol::RawSample, ReadError> {
        let request = protocol::build_read_request(slave_id, temp_reg);
        debug!(port = %self.channel.config().port, "TX {}", protocol::format_frame(&request));

        let response = self.channel.exchange(
            &request,
            protocol::MIN_RESPONSE_LEN,
            protocol::RESPONSE_LEN,
            &self.timing,
        )?;
        debug!(port = %self.channel.config().port, "RX {}", protocol::format_frame(&response));

        Ok(protocol::parse_read_response(&response, slave_id)?)
    }
}
