//! Modbus RTU framing for "Read Holding Registers" (0x03)
//!
//! Request:  `[slave][0x03][startHi][startLo][0x00][0x04][crcLo][crcHi]`
//! Response: `[slave][0x03][0x04][tempHi][tempLo][humiHi][humiLo][crcLo][crcHi]`
//!
//! The request always asks for four registers starting at the temperature
//! register. Temperature and humidity are taken from words 0 and 1 of the
//! reply; a configured humidity register that is not `start + 1` is not
//! consulted.

use super::checksum;
use thiserror::Error;

/// Number of registers requested per read
pub const READ_QUANTITY: u16 = 4;

/// Byte count a valid reply must announce (two registers)
pub const EXPECTED_BYTE_COUNT: u8 = 4;

/// Length of an encoded request
pub const REQUEST_LEN: usize = 8;

/// Length of a complete reply carrying two registers
pub const RESPONSE_LEN: usize = 3 + EXPECTED_BYTE_COUNT as usize + checksum::CRC_LEN;

/// Shortest byte sequence worth parsing
pub const MIN_RESPONSE_LEN: usize = 5;

/// Bit set in the function byte of an exception reply
const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes used by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
}

impl FunctionCode {
    /// Get function code from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            _ => None,
        }
    }

    /// Get name of function code
    pub fn name(&self) -> &'static str {
        match self {
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
        }
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Get exception from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::SlaveDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::SlaveDeviceBusy),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Get name of exception
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => "Gateway Target Failed to Respond",
        }
    }
}

/// Reason a reply frame was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes for the announced payload
    #[error("incomplete frame: {len} bytes")]
    Incomplete {
        /// Bytes received
        len: usize,
    },

    /// Reply came from another slave
    #[error("slave address mismatch: expected {expected}, got {found}")]
    SlaveMismatch {
        /// Address that was polled
        expected: u8,
        /// Address in the reply
        found: u8,
    },

    /// Function byte is not 0x03
    #[error("function code mismatch: got 0x{found:02X}{}", exception_suffix(.exception))]
    FunctionMismatch {
        /// Function byte in the reply
        found: u8,
        /// Decoded exception when the reply is an exception for 0x03
        exception: Option<ExceptionCode>,
    },

    /// Payload is not exactly two registers
    #[error("byte count mismatch: expected 4, got {found}")]
    ByteCountMismatch {
        /// Byte count field in the reply
        found: u8,
    },

    /// Trailer does not match the computed CRC
    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch {
        /// CRC over the received bytes
        computed: u16,
        /// CRC carried by the frame
        received: u16,
    },
}

fn exception_suffix(exception: &Option<ExceptionCode>) -> String {
    exception
        .map(|e| format!(" (exception 0x{:02X}: {})", e as u8, e.name()))
        .unwrap_or_default()
}

/// The two raw registers of interest from a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Word 0 of the payload
    pub temperature: u16,
    /// Word 1 of the payload
    pub humidity: u16,
}

/// Build a "read four holding registers" request
pub fn build_read_request(slave_id: u8, start_register: u16) -> [u8; REQUEST_LEN] {
    let [reg_hi, reg_lo] = start_register.to_be_bytes();
    let [qty_hi, qty_lo] = READ_QUANTITY.to_be_bytes();
    let mut frame = [
        slave_id,
        FunctionCode::ReadHoldingRegisters as u8,
        reg_hi,
        reg_lo,
        qty_hi,
        qty_lo,
        0,
        0,
    ];

    // CRC goes out low byte first
    let crc = checksum::crc16_modbus(&frame[..REQUEST_LEN - 2]);
    frame[REQUEST_LEN - 2..].copy_from_slice(&crc.to_le_bytes());

    frame
}

/// Validate a reply and extract words 0 and 1
///
/// Checks run in wire order: length, slave address, function code, byte
/// count, CRC.
pub fn parse_read_response(frame: &[u8], expected_slave: u8) -> Result<RawSample, FrameError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::Incomplete { len: frame.len() });
    }

    if frame[0] != expected_slave {
        return Err(FrameError::SlaveMismatch {
            expected: expected_slave,
            found: frame[0],
        });
    }

    let function = frame[1];
    if FunctionCode::from_u8(function) != Some(FunctionCode::ReadHoldingRegisters) {
        let exception = if function == (FunctionCode::ReadHoldingRegisters as u8 | EXCEPTION_FLAG) {
            ExceptionCode::from_u8(frame[2])
        } else {
            None
        };
        return Err(FrameError::FunctionMismatch { found: function, exception });
    }

    if frame[2] != EXPECTED_BYTE_COUNT {
        return Err(FrameError::ByteCountMismatch { found: frame[2] });
    }

    if frame.len() < RESPONSE_LEN {
        return Err(FrameError::Incomplete { len: frame.len() });
    }

    let body = &frame[..frame.len() - checksum::CRC_LEN];
    let computed = checksum::crc16_modbus(body);
    let received = checksum::trailing_crc(frame).unwrap_or_default();
    if computed != received {
        return Err(FrameError::CrcMismatch { computed, received });
    }

    Ok(RawSample {
        temperature: u16::from_be_bytes([frame[3], frame[4]]),
        humidity: u16::from_be_bytes([frame[5], frame[6]]),
    })
}

/// Format an RTU frame for trace output
pub fn format_frame(data: &[u8]) -> String {
    if data.len() < 4 {
        return format!("RTU: <{} bytes> {}", data.len(), hex::encode(data));
    }
    format!(
        "RTU: Slave={:02X} Func={:02X} Data={} CRC={:04X}",
        data[0],
        data[1],
        hex::encode(&data[2..data.len() - 2]),
        u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(slave: u8, temp: u16, humi: u16) -> Vec<u8> {
        let mut frame = vec![slave, 0x03, 0x04];
        frame.extend_from_slice(&temp.to_be_bytes());
        frame.extend_from_slice(&humi.to_be_bytes());
        checksum::append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_build_read_request_layout() {
        let frame = build_read_request(1, 0);
        assert_eq!(frame, [0x01, 0x03, 0x00, 0x00, 0x00, 0x04, 0x44, 0x09]);
    }

    #[test]
    fn test_build_read_request_all_addresses() {
        for slave in [1u8, 17, 128, 247] {
            for register in [0u16, 1, 0x00FF, 0x0100, 0x1234, 0xFFFF] {
                let frame = build_read_request(slave, register);
                let [hi, lo] = register.to_be_bytes();
                assert_eq!(frame.len(), REQUEST_LEN);
                assert_eq!(&frame[..6], &[slave, 0x03, hi, lo, 0x00, 0x04]);
                assert!(checksum::verify_crc(&frame));
            }
        }
    }

    #[test]
    fn test_parse_valid_response() {
        let frame = response(1, 0x00F5, 0x0208);
        assert_eq!(frame.len(), RESPONSE_LEN);
        let sample = parse_read_response(&frame, 1).unwrap();
        assert_eq!(sample, RawSample { temperature: 245, humidity: 520 });
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        assert_eq!(
            parse_read_response(&[0x01, 0x03, 0x04, 0x00], 1),
            Err(FrameError::Incomplete { len: 4 })
        );
        assert_eq!(parse_read_response(&[], 1), Err(FrameError::Incomplete { len: 0 }));
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let frame = response(1, 10, 20);
        assert_eq!(
            parse_read_response(&frame[..7], 1),
            Err(FrameError::Incomplete { len: 7 })
        );
    }

    #[test]
    fn test_parse_rejects_wrong_slave() {
        let frame = response(2, 10, 20);
        assert_eq!(
            parse_read_response(&frame, 1),
            Err(FrameError::SlaveMismatch { expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_parse_rejects_wrong_function() {
        let mut frame = vec![0x01, 0x04, 0x04, 0x00, 0x0A, 0x00, 0x14];
        checksum::append_crc(&mut frame);
        assert_eq!(
            parse_read_response(&frame, 1),
            Err(FrameError::FunctionMismatch { found: 0x04, exception: None })
        );
    }

    #[test]
    fn test_parse_exception_reply() {
        let mut frame = vec![0x01, 0x83, 0x02];
        checksum::append_crc(&mut frame);
        let err = parse_read_response(&frame, 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::FunctionMismatch {
                found: 0x83,
                exception: Some(ExceptionCode::IllegalDataAddress),
            }
        );
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn test_parse_rejects_byte_count() {
        let mut frame = vec![0x01, 0x03, 0x08, 0, 1, 0, 2, 0, 3, 0, 4];
        checksum::append_crc(&mut frame);
        assert_eq!(
            parse_read_response(&frame, 1),
            Err(FrameError::ByteCountMismatch { found: 8 })
        );
    }

    #[test]
    fn test_parse_rejects_bad_crc() {
        let mut frame = response(1, 245, 520);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            parse_read_response(&frame, 1),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_single_bit_flip_in_payload_or_crc_is_crc_mismatch() {
        let frame = response(1, 245, 520);
        // Header bytes are checked before the CRC, so flip only payload and trailer bits
        for byte in 3..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        parse_read_response(&corrupted, 1),
                        Err(FrameError::CrcMismatch { .. })
                    ),
                    "byte {byte} bit {bit} not detected"
                );
            }
        }
    }

    #[test]
    fn test_format_frame() {
        let frame = build_read_request(1, 0);
        assert_eq!(format_frame(&frame), "RTU: Slave=01 Func=03 Data=00000004 CRC=0944");
    }
}
