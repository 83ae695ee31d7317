//! Transport layer for RS-485/RS-232 serial lines
//!
//! A [`SerialChannel`] owns one connection and performs half-duplex
//! write-then-read exchanges. Opening the device goes through a
//! [`Connector`], so the channel can run against real hardware
//! ([`SystemConnector`]) or an in-memory bus.

mod serial;

pub use serial::{
    list_ports, ExchangeTiming, SerialChannel, SerialConfig, SerialParity, SystemConnector,
};

use std::io::{Read, Write};
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Request was not written completely
    #[error("Send failed: wrote {written} of {expected} bytes")]
    SendFailed {
        /// Bytes accepted by the device
        written: usize,
        /// Request length
        expected: usize,
    },

    /// Writing or flushing the request failed
    #[error("Write failed: {0}")]
    WriteFailed(std::io::Error),

    /// Too few bytes arrived within the wait window
    #[error("Read timeout: received {received} of at least {expected} bytes")]
    ReadTimeout {
        /// Bytes received
        received: usize,
        /// Minimum bytes required
        expected: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Completed exchanges
    pub exchanges: u64,
    /// Failed exchanges
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Raw byte stream of an open serial device
pub trait SerialIo: Read + Write + Send {
    /// Discard bytes received but not yet read
    fn clear_input(&mut self) -> std::io::Result<()>;
}

impl SerialIo for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

/// Opens serial devices
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    /// Open the device described by `config`
    fn connect(&self, config: &SerialConfig) -> Result<Box<dyn SerialIo>, TransportError>;
}
