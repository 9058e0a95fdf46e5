//! Serial COM port endpoint backed by `tokio-serial`.
//!
//! Available behind the `serial` cargo feature. The endpoint satisfies the
//! dual-mode read contract through the driver's receive-queue query, so the
//! engine can poll "bytes available" without consuming anything.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};

use crate::endpoint::Endpoint;

/// Serial line settings for [`SerialEndpoint::open`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// A COM port as seen by the exchange engine.
///
/// The port is not internally serialized against concurrent exchanges;
/// give every [`Exchange`](crate::Exchange) sharing this endpoint the same
/// port-lock key.
pub struct SerialEndpoint {
    port: Mutex<SerialStream>,
    name: String,
}

impl SerialEndpoint {
    /// Open `port` (e.g. `/dev/ttyUSB0` or `COM7`) with the given line
    /// settings.
    pub fn open(port: &str, config: &SerialConfig) -> io::Result<Self> {
        let builder = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .parity(config.parity);
        let stream = builder
            .open_native_async()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Self {
            port: Mutex::new(stream),
            name: port.to_string(),
        })
    }
}

#[async_trait]
impl Endpoint for SerialEndpoint {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut port = self.port.lock().await;
        let written = port.write(buf).await?;
        port.flush().await?;
        Ok(written)
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut port = self.port.lock().await;
        if buf.is_empty() {
            return port
                .bytes_to_read()
                .map(|count| count as usize)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        }
        port.read(buf).await
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
