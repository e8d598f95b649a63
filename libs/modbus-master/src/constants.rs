//! Modbus protocol constants used by the master engine

use std::time::Duration;

// ============================================================================
// Frame Layout Constants
// ============================================================================

/// MBAP header length for TCP
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const TCP_HEADER_LEN: usize = 7;

/// Offset of the function code inside a TCP frame
pub const TCP_DATA_BODY_OFFSET: usize = TCP_HEADER_LEN;

/// TCP read/write request size: MBAP(7) + FC(1) + Address(2) + Count/Value(2)
pub const TCP_REQUEST_SIZE: usize = 12;

/// MBAP length field for single read/write requests: Unit ID + 5 PDU bytes
pub const TCP_REQUEST_LENGTH_FIELD: u16 = 6;

/// Offset of the function code inside an RTU frame (after the unit id)
pub const RTU_DATA_BODY_OFFSET: usize = 1;

/// RTU request size: Unit(1) + FC(1) + Address(2) + Count/Value(2) + CRC(2)
pub const RTU_REQUEST_SIZE: usize = 8;

/// RTU response prefix: Unit(1) + FC(1) + ByteCount or exception code(1)
pub const RTU_RESPONSE_PREFIX_LEN: usize = 3;

/// CRC16 trailer length
pub const CRC_LEN: usize = 2;

/// Maximum PDU size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Response buffer capacity (MBAP + largest PDU, rounded up)
pub const RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Timing Constants
// ============================================================================

/// Inter-frame guard time for TCP (none needed)
pub const TCP_SILENT_INTERVAL: Duration = Duration::from_millis(0);

/// Inter-frame guard time for RTU
pub const RTU_SILENT_INTERVAL: Duration = Duration::from_millis(100);

/// Time given to a serial adapter after opening before the first frame
pub const RTU_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Upper bound on establishing a TCP connection
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Operation Limits
// ============================================================================

/// Largest value count accepted for one read operation
pub const MAX_READ_COUNT: u16 = 32;

/// Value written to a coil to switch it on (FC05)
pub const COIL_ON: u16 = 0xFF00;

/// Value written to a coil to switch it off (FC05)
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Configuration Defaults
// ============================================================================

pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_RETRY_COUNT: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;
pub const DEFAULT_TCP_PORT: u16 = 502;
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CORRELATION_ID: &str = "DefaultCorrelationId";

/// Source timestamp format used to bucket output values per second
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get exception code description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
