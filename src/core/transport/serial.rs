//! Serial port transport implementation

use super::{Connector, SerialIo, TransportError, TransportStats};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    #[serde(alias = "N", alias = "n", alias = "none")]
    None,
    /// Odd parity
    #[serde(alias = "O", alias = "o", alias = "odd")]
    Odd,
    /// Even parity
    #[serde(alias = "E", alias = "e", alias = "even")]
    Even,
}

impl SerialParity {
    /// Single-letter form used in `8N1` style summaries
    pub fn letter(&self) -> char {
        match self {
            SerialParity::None => 'N',
            SerialParity::Odd => 'O',
            SerialParity::Even => 'E',
        }
    }
}

impl std::str::FromStr for SerialParity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown parity '{other}'"
            ))),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Read timeout
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings (8N1, 1 s)
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            timeout: Duration::from_secs(1),
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set read timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Line settings summary, e.g. `COM3 @ 9600 baud (8N1)`
    pub fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.port,
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 9600)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_info())
    }
}

/// Opens real devices through the `serialport` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn connect(&self, config: &SerialConfig) -> Result<Box<dyn SerialIo>, TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::PortNotFound(config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                serialport::ErrorKind::InvalidInput => {
                    TransportError::InvalidConfiguration(e.to_string())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        Ok(Box::new(port))
    }
}

/// Delays applied around one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTiming {
    /// Pause between writing the request and the first read
    pub response_wait: Duration,
    /// Pause between reads while the reply is still incomplete
    pub inter_byte: Duration,
}

impl ExchangeTiming {
    /// No pauses at all (in-memory buses)
    pub const fn immediate() -> Self {
        Self {
            response_wait: Duration::ZERO,
            inter_byte: Duration::ZERO,
        }
    }
}

impl Default for ExchangeTiming {
    fn default() -> Self {
        Self {
            response_wait: Duration::from_millis(100),
            inter_byte: Duration::from_millis(10),
        }
    }
}

/// One exclusively owned serial connection
pub struct SerialChannel {
    config: SerialConfig,
    connector: Arc<dyn Connector>,
    port: Option<Box<dyn SerialIo>>,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl SerialChannel {
    /// Create a closed channel
    pub fn new(config: SerialConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            port: None,
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    /// Line configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Open the device; an already open channel is left as is
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = self.connector.connect(&self.config)?;
        self.port = Some(port);
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();

        debug!(port = %self.config.port, "serial channel opened");
        Ok(())
    }

    /// Close the device (idempotent)
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.config.port, "serial channel closed");
        }
        self.connected_at = None;
    }

    /// Check if open
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }

    /// Write `request`, wait, then collect the reply
    ///
    /// Reading stops once `expected_len` bytes arrived or the port timeout
    /// elapsed. Fewer than `min_len` bytes is a [`TransportError::ReadTimeout`].
    pub fn exchange(
        &mut self,
        request: &[u8],
        min_len: usize,
        expected_len: usize,
        timing: &ExchangeTiming,
    ) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = port.clear_input() {
            trace!(port = %self.config.port, error = %e, "could not discard stale input");
        }

        let written = match port.write(request) {
            Ok(n) => n,
            Err(e) => {
                self.stats.errors += 1;
                debug!(port = %self.config.port, error = %e, "write failed");
                return Err(TransportError::WriteFailed(e));
            }
        };
        self.stats.bytes_sent += written as u64;
        if written != request.len() {
            self.stats.errors += 1;
            return Err(TransportError::SendFailed {
                written,
                expected: request.len(),
            });
        }
        if let Err(e) = port.flush() {
            self.stats.errors += 1;
            debug!(port = %self.config.port, error = %e, "flush failed");
            return Err(TransportError::WriteFailed(e));
        }

        if !timing.response_wait.is_zero() {
            std::thread::sleep(timing.response_wait);
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut response = Vec::with_capacity(expected_len);
        let mut buffer = [0u8; 256];

        while response.len() < expected_len {
            let want = (expected_len - response.len()).min(buffer.len());
            match port.read(&mut buffer[..want]) {
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    self.stats.errors += 1;
                    return Err(TransportError::IoError(e));
                }
            }

            if response.len() >= expected_len || Instant::now() >= deadline {
                break;
            }
            if !timing.inter_byte.is_zero() {
                std::thread::sleep(timing.inter_byte);
            }
        }

        self.stats.bytes_received += response.len() as u64;

        if response.len() < min_len {
            self.stats.errors += 1;
            return Err(TransportError::ReadTimeout {
                received: response.len(),
                expected: min_len,
            });
        }

        self.stats.exchanges += 1;
        Ok(response)
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialChannel")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
