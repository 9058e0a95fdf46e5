//! Modbus RTU framing: request serialization, CRC-16 and the standard
//! response sanity checks.
//!
//! A serialized frame is `[addr][function_code][payload…][crc]` with the
//! CRC-16/MODBUS checksum appended low byte first, so that recomputing the
//! CRC over the complete frame yields zero. Response validation leans on
//! exactly that residue property.

use crc::{Crc, CRC_16_MODBUS};

use crate::codec::FloatBitsFormat;
use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_FRAME_LEN, FC_READ_HOLDING_REGISTERS, MIN_RESPONSE_LEN,
};
use crate::error::{CommResult, ProtocolFault};
use crate::exchange::Exchange;

/// CRC calculator for Modbus RTU frames.
pub const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus CRC16 over `data` (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// One Modbus request before serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Slave address.
    pub addr: u8,
    /// Protocol function code.
    pub proto_cmd: u8,
    /// Function-specific payload.
    pub data: Vec<u8>,
}

impl Request {
    /// Request with an explicit payload.
    pub fn new(addr: u8, proto_cmd: u8, data: Vec<u8>) -> Self {
        Self {
            addr,
            proto_cmd,
            data,
        }
    }

    /// Read `count` holding registers starting at `first_reg` (function 3).
    pub fn read3(addr: u8, first_reg: u16, count: u16) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&first_reg.to_be_bytes());
        data.extend_from_slice(&count.to_be_bytes());
        Self::new(addr, FC_READ_HOLDING_REGISTERS, data)
    }

    /// Vendor "write at register 32" device command carrying a 4-byte
    /// value encoded per `format`.
    pub fn write32(
        addr: u8,
        proto_cmd: u8,
        device_cmd: u16,
        value: f64,
        format: FloatBitsFormat,
    ) -> CommResult<Self> {
        let mut data = vec![0x00, 0x20, 0x00, 0x03, 0x06];
        data.extend_from_slice(&device_cmd.to_be_bytes());
        let mut encoded = [0u8; 4];
        format.put_float(&mut encoded, value)?;
        data.extend_from_slice(&encoded);
        Ok(Self::new(addr, proto_cmd, data))
    }

    /// Serialized frame: `[addr][function_code][payload…][crc]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(4 + self.data.len());
        frame.push(self.addr);
        frame.push(self.proto_cmd);
        frame.extend_from_slice(&self.data);
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Standard sanity checks every Modbus response must pass: minimal
    /// length, zero CRC residue over the whole frame, address echo, the
    /// exception-frame pattern, and the function-code echo.
    pub fn check_response(&self, response: &[u8]) -> Result<(), ProtocolFault> {
        if response.len() < MIN_RESPONSE_LEN {
            return Err(ProtocolFault::ShortResponse {
                got: response.len(),
            });
        }
        if crc16(response) != 0 {
            return Err(ProtocolFault::CrcMismatch);
        }
        if response[0] != self.addr {
            return Err(ProtocolFault::AddressMismatch {
                requested: self.addr,
                got: response[0],
            });
        }
        if response.len() == EXCEPTION_FRAME_LEN && response[1] == self.proto_cmd | EXCEPTION_FLAG
        {
            return Err(ProtocolFault::DeviceException { code: response[2] });
        }
        if response[1] != self.proto_cmd {
            return Err(ProtocolFault::FunctionCodeMismatch {
                requested: self.proto_cmd,
                got: response[1],
            });
        }
        Ok(())
    }

    /// Run the exchange for this request with the standard sanity checks
    /// prepended to whatever validators the exchange already carries.
    pub async fn fetch(&self, exchange: &Exchange) -> CommResult<Vec<u8>> {
        let checker = self.clone();
        let exchange = exchange
            .clone()
            .with_prepended_parser(move |_request, response| checker.check_response(response));
        exchange.get_response(&self.to_bytes()).await.map_err(|err| {
            err.context(format!(
                "modbus address={} command={}",
                self.addr, self.proto_cmd
            ))
        })
    }
}
