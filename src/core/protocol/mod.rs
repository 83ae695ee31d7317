//! Protocol implementations
//!
//! Provides the Modbus RTU pieces the poller needs:
//! - CRC-16/Modbus checksum
//! - "Read Holding Registers" request encoding and reply validation

pub mod checksum;
pub mod modbus;

pub use checksum::{append_crc, crc16_modbus, verify_crc};
pub use modbus::{
    build_read_request, format_frame, parse_read_response, ExceptionCode, FrameError,
    FunctionCode, RawSample, MIN_RESPONSE_LEN, RESPONSE_LEN,
};
