//! Virtual Modbus RTU bus
//!
//! In-memory stand-in for serial lines with temperature/humidity slaves
//! attached. Implements [`Connector`], so a `MultiPortReader` can poll it
//! exactly like real hardware. Used by tests and by `thpoll --simulate`.

use crate::config::PortConfig;
use crate::core::protocol::{checksum, modbus};
use crate::core::sensor::SensorDescriptor;
use crate::core::transport::{Connector, SerialConfig, SerialIo, TransportError};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::Arc;

/// Misbehaviour a virtual slave can be told to exhibit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Answer correctly
    #[default]
    None,
    /// Never answer
    Silent,
    /// Answer with a damaged CRC trailer
    CorruptCrc,
    /// Answer with another slave address
    WrongSlave(u8),
    /// Answer with a Modbus exception
    Exception(u8),
    /// Send only the first `n` bytes of the reply
    Truncate(usize),
}

/// A slave with a four-register holding block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualSensor {
    /// Slave address
    pub slave_id: u8,
    /// First register of the block
    pub base_register: u16,
    /// Raw word 0
    pub temperature_raw: u16,
    /// Raw word 1
    pub humidity_raw: u16,
    /// Injected fault
    pub fault: Fault,
}

impl VirtualSensor {
    /// Create a healthy sensor at register 0
    pub fn new(slave_id: u8, temperature_raw: u16, humidity_raw: u16) -> Self {
        Self {
            slave_id,
            base_register: 0,
            temperature_raw,
            humidity_raw,
            fault: Fault::None,
        }
    }

    /// Set the injected fault
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Set the first register of the block
    #[must_use]
    pub fn at_register(mut self, base_register: u16) -> Self {
        self.base_register = base_register;
        self
    }

    /// Reply to a decoded request, or `None` to stay silent
    fn respond(&self, start_register: u16) -> Option<Vec<u8>> {
        if self.fault == Fault::Silent {
            return None;
        }

        if let Fault::Exception(code) = self.fault {
            let mut frame = vec![self.slave_id, 0x83, code];
            checksum::append_crc(&mut frame);
            return Some(frame);
        }

        if start_register != self.base_register {
            let mut frame = vec![self.slave_id, 0x83, 0x02];
            checksum::append_crc(&mut frame);
            return Some(frame);
        }

        let slave = match self.fault {
            Fault::WrongSlave(other) => other,
            _ => self.slave_id,
        };
        let mut frame = vec![slave, 0x03, modbus::EXPECTED_BYTE_COUNT];
        frame.extend_from_slice(&self.temperature_raw.to_be_bytes());
        frame.extend_from_slice(&self.humidity_raw.to_be_bytes());
        checksum::append_crc(&mut frame);

        match self.fault {
            Fault::CorruptCrc => {
                if let Some(last) = frame.last_mut() {
                    *last ^= 0xFF;
                }
            }
            Fault::Truncate(n) => frame.truncate(n),
            _ => {}
        }

        Some(frame)
    }
}

type Lines = Arc<RwLock<HashMap<String, Vec<VirtualSensor>>>>;

/// A set of virtual serial lines keyed by device path
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    lines: Lines,
}

impl SimulatedBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus mirroring a configuration: one line per port, one healthy slave per sensor
    ///
    /// Raw values are derived from the slave address so sensors are told apart.
    pub fn for_config(ports: &[PortConfig], sensors: &[SensorDescriptor]) -> Self {
        let bus = Self::new();
        for port in ports {
            bus.add_line(&port.port);
        }
        for sensor in sensors {
            let Some(port) = ports.iter().find(|p| p.name == sensor.port) else {
                continue;
            };
            let id = u16::from(sensor.slave_id);
            bus.attach(
                &port.port,
                VirtualSensor::new(sensor.slave_id, 200 + id * 5, 450 + id * 10)
                    .at_register(sensor.temp_reg),
            );
        }
        bus
    }

    /// Make `path` openable (with no slaves yet)
    pub fn add_line(&self, path: &str) {
        self.lines.write().entry(path.to_string()).or_default();
    }

    /// Attach a slave to the line at `path`, creating the line if needed
    pub fn attach(&self, path: &str, sensor: VirtualSensor) {
        let mut lines = self.lines.write();
        let slaves = lines.entry(path.to_string()).or_default();
        slaves.retain(|s| s.slave_id != sensor.slave_id);
        slaves.push(sensor);
    }

    /// Change the raw values of an attached slave
    pub fn set_values(&self, path: &str, slave_id: u8, temperature_raw: u16, humidity_raw: u16) {
        self.update(path, slave_id, |s| {
            s.temperature_raw = temperature_raw;
            s.humidity_raw = humidity_raw;
        });
    }

    /// Change the fault of an attached slave
    pub fn set_fault(&self, path: &str, slave_id: u8, fault: Fault) {
        self.update(path, slave_id, |s| s.fault = fault);
    }

    fn update(&self, path: &str, slave_id: u8, f: impl FnOnce(&mut VirtualSensor)) {
        if let Some(sensor) = self
            .lines
            .write()
            .get_mut(path)
            .and_then(|slaves| slaves.iter_mut().find(|s| s.slave_id == slave_id))
        {
            f(sensor);
        }
    }
}

impl Connector for SimulatedBus {
    fn connect(&self, config: &SerialConfig) -> Result<Box<dyn SerialIo>, TransportError> {
        if !self.lines.read().contains_key(&config.port) {
            return Err(TransportError::PortNotFound(config.port.clone()));
        }
        Ok(Box::new(SimulatedPort {
            path: config.port.clone(),
            lines: self.lines.clone(),
            pending: VecDeque::new(),
        }))
    }
}

/// One open handle onto a virtual line
struct SimulatedPort {
    path: String,
    lines: Lines,
    pending: VecDeque<u8>,
}

impl SimulatedPort {
    fn handle_request(&mut self, request: &[u8]) {
        if request.len() != modbus::REQUEST_LEN || !checksum::verify_crc(request) {
            return;
        }
        let slave_id = request[0];
        let start = u16::from_be_bytes([request[2], request[3]]);

        let reply = self
            .lines
            .read()
            .get(&self.path)
            .and_then(|slaves| slaves.iter().find(|s| s.slave_id == slave_id))
            .and_then(|s| s.respond(start));

        if let Some(reply) = reply {
            self.pending.extend(reply);
        }
    }
}

impl Read for SimulatedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.handle_request(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SerialIo for SimulatedPort {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(bus: &SimulatedBus, path: &str, request: &[u8]) -> Vec<u8> {
        let mut port = bus.connect(&SerialConfig::new(path, 9600)).unwrap();
        port.write_all(request).unwrap();
        let mut buf = [0u8; 32];
        match port.read(&mut buf) {
            Ok(n) => buf[..n].to_vec(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_unknown_line_is_not_found() {
        let bus = SimulatedBus::new();
        let err = bus.connect(&SerialConfig::new("/dev/ttyS9", 9600)).err().unwrap();
        assert!(matches!(err, TransportError::PortNotFound(_)));
    }

    #[test]
    fn test_healthy_reply() {
        let bus = SimulatedBus::new();
        bus.attach("sim0", VirtualSensor::new(1, 245, 520));
        let reply = exchange(&bus, "sim0", &modbus::build_read_request(1, 0));
        let sample = modbus::parse_read_response(&reply, 1).unwrap();
        assert_eq!((sample.temperature, sample.humidity), (245, 520));
    }

    #[test]
    fn test_faults() {
        let bus = SimulatedBus::new();
        bus.attach("sim0", VirtualSensor::new(1, 245, 520).with_fault(Fault::Silent));
        assert!(exchange(&bus, "sim0", &modbus::build_read_request(1, 0)).is_empty());

        bus.set_fault("sim0", 1, Fault::CorruptCrc);
        let reply = exchange(&bus, "sim0", &modbus::build_read_request(1, 0));
        assert!(!checksum::verify_crc(&reply));

        bus.set_fault("sim0", 1, Fault::Exception(0x04));
        let reply = exchange(&bus, "sim0", &modbus::build_read_request(1, 0));
        assert_eq!(&reply[..3], &[1, 0x83, 0x04]);
    }

    #[test]
    fn test_for_config() {
        let ports = vec![PortConfig::new("port1", "/dev/ttyUSB0")];
        let sensors = vec![
            SensorDescriptor::new("a", "port1", 1),
            SensorDescriptor::new("b", "port1", 2).registers(10, 11),
            SensorDescriptor::new("orphan", "port9", 3),
        ];
        let bus = SimulatedBus::for_config(&ports, &sensors);

        let reply = exchange(&bus, "/dev/ttyUSB0", &modbus::build_read_request(2, 10));
        let sample = modbus::parse_read_response(&reply, 2).unwrap();
        assert_eq!((sample.temperature, sample.humidity), (210, 470));
        assert!(exchange(&bus, "/dev/ttyUSB0", &modbus::build_read_request(3, 0)).is_empty());
    }

    #[test]
    fn test_unknown_slave_stays_silent() {
        let bus = SimulatedBus::new();
        bus.attach("sim0", VirtualSensor::new(1, 1, 2));
        assert!(exchange(&bus, "sim0", &modbus::build_read_request(7, 0)).is_empty());
    }
}
