//! Typed Modbus operations on top of the exchange engine.
//!
//! [`ModbusClient`] wraps an [`Exchange`] and exposes the instrument-facing
//! calls: raw register reads, encoded-value reads and the vendor write-32
//! device command. Each operation derives its own exchange with the
//! format-specific validator appended, so the shared base exchange stays
//! untouched.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use instrument_comm::{
//!     Exchange, ExchangeConfig, FloatBitsFormat, MockEndpoint, ModbusClient,
//! };
//!
//! # async fn example() -> instrument_comm::CommResult<()> {
//! let endpoint = Arc::new(MockEndpoint::new("COM7", |_| Vec::new()));
//! let exchange = Exchange::new(
//!     endpoint,
//!     ExchangeConfig::new(Duration::from_millis(500), Duration::from_millis(20))
//!         .with_attempts(3),
//! )
//! .with_port_lock("COM7");
//!
//! let client = ModbusClient::new(exchange);
//! let value = client
//!     .read3_value(0x01, 0x0000, FloatBitsFormat::Bcd)
//!     .await?;
//! println!("concentration: {value}");
//! # Ok(())
//! # }
//! ```

use crate::codec::{ByteOrder, FloatBitsFormat};
use crate::constants::MAX_READ_REGISTERS;
use crate::error::{CommError, CommResult, ProtocolFault};
use crate::exchange::Exchange;
use crate::frame::Request;
use crate::notify::hex;

/// Byte offset of the first data byte in a FC03 response
/// (address, function code, byte count).
const READ3_DATA_OFFSET: usize = 3;

/// Single-master Modbus client over one exchange configuration.
pub struct ModbusClient {
    exchange: Exchange,
}

impl ModbusClient {
    /// Client over `exchange`. The exchange keeps its validators, port
    /// lock and cancellation token; operations only append their own
    /// checks to derived copies.
    pub fn new(exchange: Exchange) -> Self {
        Self { exchange }
    }

    /// The underlying exchange.
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Read `count` holding registers (function 3) and return the complete
    /// response frame.
    ///
    /// A length validator is appended: the response must be exactly
    /// `5 + 2 * count` bytes.
    pub async fn read3(&self, addr: u8, first_reg: u16, count: u16) -> CommResult<Vec<u8>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(CommError::Config(format!(
                "register count {count} outside 1..={MAX_READ_REGISTERS}"
            )));
        }
        let expected = 5 + 2 * count as usize;
        let exchange = self.exchange.clone().with_appended_parser(move |_, response| {
            if response.len() != expected {
                return Err(ProtocolFault::LengthMismatch {
                    expected,
                    got: response.len(),
                });
            }
            Ok(())
        });
        Request::read3(addr, first_reg, count)
            .fetch(&exchange)
            .await
            .map_err(|err| err.context(format!("register {first_reg}: {count} registers")))
    }

    /// Read `count` encoded values of four bytes each, decoded per
    /// `format`.
    ///
    /// A decode failure is a value error of the response already accepted
    /// on the wire; it is surfaced immediately and never retried.
    pub async fn read3_values(
        &self,
        addr: u8,
        first_reg: u16,
        count: usize,
        format: FloatBitsFormat,
    ) -> CommResult<Vec<f64>> {
        if count == 0 || count > (MAX_READ_REGISTERS / 2) as usize {
            return Err(CommError::Config(format!(
                "value count {count} outside 1..={}",
                MAX_READ_REGISTERS / 2
            )));
        }
        let response = self
            .read3(addr, first_reg, (count * 2) as u16)
            .await
            .map_err(|err| err.context(format!("request of {count} values in {format}")))?;

        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let offset = READ3_DATA_OFFSET + i * 4;
            let value = format
                .parse_float(&response[offset..offset + 4])
                .map_err(|err| err.context(format!("value {i} at offset {offset}")))?;
            values.push(value);
        }
        Ok(values)
    }

    /// Read a single encoded value at `first_reg`.
    pub async fn read3_value(
        &self,
        addr: u8,
        first_reg: u16,
        format: FloatBitsFormat,
    ) -> CommResult<f64> {
        let response = self
            .read3(addr, first_reg, 2)
            .await
            .map_err(|err| err.context(format!("request of a value in {format}")))?;
        format.parse_float(&response[READ3_DATA_OFFSET..READ3_DATA_OFFSET + 4])
    }

    /// Read one raw 16-bit register in the requested byte order.
    pub async fn read3_u16(&self, addr: u8, first_reg: u16, order: ByteOrder) -> CommResult<u16> {
        let response = self
            .read3(addr, first_reg, 1)
            .await
            .map_err(|err| err.context("request of a u16"))?;
        Ok(order.u16_from([
            response[READ3_DATA_OFFSET],
            response[READ3_DATA_OFFSET + 1],
        ]))
    }

    /// Send a device command through the vendor write-at-register-32
    /// pattern and verify the device's echo.
    ///
    /// The acknowledgement is the echo window: `response[2..6]` must equal
    /// `request[2..6]`.
    pub async fn write32(
        &self,
        addr: u8,
        proto_cmd: u8,
        device_cmd: u16,
        value: f64,
        format: FloatBitsFormat,
    ) -> CommResult<()> {
        let request = Request::write32(addr, proto_cmd, device_cmd, value, format)?;
        let exchange = self.exchange.clone().with_appended_parser(|request, response| {
            if response.len() < 6 || request[2..6] != response[2..6] {
                return Err(ProtocolFault::EchoMismatch {
                    requested: hex(&request[2..6]),
                    got: hex(&response[2..response.len().min(6)]),
                });
            }
            Ok(())
        });
        request
            .fetch(&exchange)
            .await
            .map_err(|err| {
                err.context(format!(
                    "write command={device_cmd} argument={value} ({format})"
                ))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockEndpoint;
    use crate::exchange::ExchangeConfig;
    use crate::frame::crc16;
    use std::sync::Arc;
    use std::time::Duration;

    fn with_crc(frame: &[u8]) -> Vec<u8> {
        let mut full = frame.to_vec();
        full.extend_from_slice(&crc16(frame).to_le_bytes());
        full
    }

    fn client_for(respond: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> ModbusClient {
        let endpoint = Arc::new(MockEndpoint::new("test", respond));
        ModbusClient::new(Exchange::new(
            endpoint,
            ExchangeConfig::new(Duration::from_millis(200), Duration::from_millis(2)),
        ))
    }

    #[tokio::test]
    async fn test_read3_u16_byte_orders() {
        let client = client_for(|_| with_crc(&[0x01, 0x03, 0x02, 0x12, 0x34]));

        let be = client.read3_u16(0x01, 0, ByteOrder::BigEndian).await.unwrap();
        assert_eq!(be, 0x1234);
        let le = client
            .read3_u16(0x01, 0, ByteOrder::LittleEndian)
            .await
            .unwrap();
        assert_eq!(le, 0x3412);
    }

    #[tokio::test]
    async fn test_read3_rejects_bad_count() {
        let client = client_for(|_| Vec::new());
        let err = client.read3(0x01, 0, 0).await.unwrap_err();
        assert!(matches!(err.root(), CommError::Config(_)));
        let err = client.read3(0x01, 0, 126).await.unwrap_err();
        assert!(matches!(err.root(), CommError::Config(_)));
    }

    #[tokio::test]
    async fn test_read3_length_validator() {
        // device answers with one register when two were requested
        let client = client_for(|_| with_crc(&[0x01, 0x03, 0x02, 0x00, 0x01]));
        let err = client.read3(0x01, 0, 2).await.unwrap_err();
        assert_eq!(
            err.protocol_fault(),
            Some(&ProtocolFault::LengthMismatch {
                expected: 9,
                got: 7
            })
        );
    }

    #[tokio::test]
    async fn test_read3_values_decodes_each_window() {
        let client = client_for(|_| {
            with_crc(&[
                0x01, 0x03, 0x08, 0x00, 0x12, 0x34, 0x50, 0x90, 0x00, 0x12, 0x33,
            ])
        });
        let values = client
            .read3_values(0x01, 0, 2, FloatBitsFormat::Bcd)
            .await
            .unwrap();
        assert_eq!(values, vec![1234.50, -12.33]);
    }

    #[tokio::test]
    async fn test_read3_values_bad_value_is_not_retried() {
        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = writes.clone();
        let client = {
            let endpoint = Arc::new(MockEndpoint::new("test", move |_req: &[u8]| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                with_crc(&[0x01, 0x03, 0x04, 0x0F, 0xFF, 0xFF, 0xFF])
            }));
            ModbusClient::new(Exchange::new(
                endpoint,
                ExchangeConfig::new(Duration::from_millis(200), Duration::from_millis(2))
                    .with_attempts(3),
            ))
        };

        let err = client
            .read3_value(0x01, 0, FloatBitsFormat::Bcd)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), CommError::BadValue { .. }));
        assert_eq!(writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
