//! Modbus protocol constants used by this crate.
//!
//! Limits are derived from the Modbus specification: the RTU ADU is capped
//! at 256 bytes (1 address + 253 PDU + 2 CRC), which bounds how many
//! registers one read may request.

// ============================================================================
// Function codes
// ============================================================================

/// Read Holding Registers (FC03), the only standard read this driver
/// issues.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Multiple Registers (FC16), the base code of the vendor write-32
/// device-command pattern.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Flag OR-ed onto the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Frame sizes
// ============================================================================

/// Minimal valid response: address, function code and CRC.
pub const MIN_RESPONSE_LEN: usize = 4;

/// Exception frame length: address, flagged function code, exception code
/// and CRC.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Maximum number of registers for one FC03 read.
///
/// Response PDU: 1 function code + 1 byte count + N × 2 data ≤ 253,
/// therefore N ≤ 125.
pub const MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Exception codes
// ============================================================================

/// Human-readable description of a device exception code.
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
