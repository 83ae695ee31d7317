//! Core module containing the polling machinery
//!
//! This module provides:
//! - Modbus RTU framing and CRC-16 (protocol)
//! - Half-duplex serial exchanges (transport)
//! - Per-port sensor reading (sensor)
//! - Named port registry and sensor fan-out (multi_port)
//! - Reading persistence (storage)
//! - The periodic driver (poller)
//! - An in-memory RTU bus for tests and dry runs (simulator)

pub mod multi_port;
pub mod poller;
pub mod protocol;
pub mod sensor;
pub mod simulator;
pub mod storage;
pub mod transport;
