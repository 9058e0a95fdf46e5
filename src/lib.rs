//! # Instrument Comm: serial request/response engine for Modbus instruments
//!
//! A host-side driver library for RS-232/RS-485 instruments speaking a
//! MODBUS-derived request/response protocol: issue a framed request, wait
//! for the framed answer under two distinct timeouts, validate it, retry on
//! protocol faults, and surface either the response bytes or a classified
//! error.
//!
//! ## Features
//!
//! - **Two-tier timeouts**: a hard response ceiling plus an inter-byte
//!   quiet-gap heuristic for frame completion, never collapsed into one
//!   timer
//! - **Per-port serialization**: a process-wide lock registry guarantees at
//!   most one in-flight exchange per named port
//! - **Composable validation**: prepend/append response parsers onto a
//!   shared base exchange without touching it
//! - **Bounded retry**: protocol faults and response timeouts retry within
//!   a configurable attempt budget
//! - **Cooperative cancellation**: every suspension point honors a
//!   `CancellationToken`
//! - **Observability**: per-attempt `tracing` records and a fire-and-forget
//!   notification callback carrying request/response copies
//! - **Modbus framing**: CRC-16, response sanity checks, exception frames,
//!   read-holding-registers and the vendor write-32 device command
//! - **Numeric codecs**: packed BCD6 and IEEE-754 / int32 in either byte
//!   order
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use instrument_comm::{
//!     Exchange, ExchangeConfig, FloatBitsFormat, MockEndpoint, ModbusClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> instrument_comm::CommResult<()> {
//!     // A fake endpoint; enable the `serial` feature for real COM ports.
//!     let endpoint = Arc::new(MockEndpoint::new("COM7", |_| Vec::new()));
//!
//!     let exchange = Exchange::new(
//!         endpoint,
//!         ExchangeConfig::new(Duration::from_millis(500), Duration::from_millis(20))
//!             .with_attempts(3),
//!     )
//!     .with_port_lock("COM7");
//!
//!     let client = ModbusClient::new(exchange);
//!     let value = client.read3_value(0x01, 0x0000, FloatBitsFormat::Bcd).await?;
//!     println!("value: {value}");
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Byte-stream endpoint contract and in-memory fake
pub mod endpoint;

/// Process-wide per-port lock registry
pub mod portlock;

/// Composable response validators
pub mod parser;

/// Exchange side channels: notification slot and log flag
pub mod notify;

/// The serial exchange engine
pub mod exchange;

/// Modbus RTU framing and CRC-16
pub mod frame;

/// Encoded numeric values: BCD6 and float/int formats
pub mod codec;

/// Typed Modbus operations
pub mod client;

/// Serial COM port endpoint (requires the `serial` feature)
#[cfg(feature = "serial")]
pub mod serial;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use instrument_comm::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::ModbusClient;

// === Error handling ===
pub use error::{CommError, CommResult, ProtocolFault};

// === Engine ===
pub use exchange::{Exchange, ExchangeConfig};

// === Endpoints ===
pub use endpoint::{Endpoint, MockEndpoint};

// === Framing and codecs ===
pub use codec::{bcd6, parse_bcd6, put_bcd6, ByteOrder, FloatBitsFormat};
pub use frame::{crc16, Request};

// === Validation ===
pub use parser::ParserPipeline;

// === Side channels ===
pub use notify::{clear_notify, hex, set_log_enabled, set_notify, ExchangeEvent, NotifyFn};

#[cfg(feature = "serial")]
pub use serial::{SerialConfig, SerialEndpoint};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
