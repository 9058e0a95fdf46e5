//! Byte-stream endpoint contract.
//!
//! The exchange engine drives any [`Endpoint`]: a real COM port behind the
//! `serial` feature, or an in-memory fake for tests. The read side is
//! dual-mode: an empty buffer queries how many bytes the endpoint has
//! buffered without consuming anything, a non-empty buffer drains exactly
//! that many bytes. This lets the engine sleep only while the receive queue
//! is empty and never over-read past a frame boundary.

use std::io;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Abstract serial endpoint: a byte stream with a "bytes available" query.
///
/// Implementations are not expected to be internally synchronized against
/// concurrent exchanges; the per-port lock carried by an
/// [`Exchange`](crate::Exchange) is what makes shared access safe. Every
/// `Exchange` sharing one endpoint must share the same lock key.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Write the request frame.
    ///
    /// Returning `Ok(0)` legally signals "not yet transmittable" (a port
    /// still busy with a previous operation); the engine re-issues the
    /// write, bounded by the response timeout. A return of fewer bytes
    /// than `buf.len()` fails the exchange with a short-write error.
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Dual-mode read.
    ///
    /// With an empty `buf`, returns the count of bytes currently buffered
    /// in the receive queue, consuming nothing. Otherwise fills `buf` and
    /// returns the count actually read; delivering fewer bytes than
    /// requested is treated as a fault by the engine, not a partial read.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Identifier carried in notifications and log records.
    fn name(&self) -> String {
        String::new()
    }
}

/// In-memory endpoint mapping each written request to a canned response.
///
/// The respond function runs once per write; the produced bytes are then
/// served through the dual-mode read contract. Returning an empty response
/// simulates a silent device.
///
/// # Example
///
/// ```rust
/// use instrument_comm::MockEndpoint;
///
/// let endpoint = MockEndpoint::new("COM1", |request| {
///     // echo the request back without its CRC
///     request[..request.len() - 2].to_vec()
/// });
/// # let _ = endpoint;
/// ```
pub struct MockEndpoint {
    respond: Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pending: Mutex<Vec<u8>>,
    name: String,
}

impl MockEndpoint {
    /// Create a mock named `name` answering with `respond(request)`.
    pub fn new(
        name: impl Into<String>,
        respond: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            pending: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock().await;
        *pending = (self.respond)(buf);
        Ok(buf.len())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock().await;
        if buf.is_empty() {
            return Ok(pending.len());
        }
        let count = buf.len().min(pending.len());
        buf[..count].copy_from_slice(&pending[..count]);
        pending.drain(..count);
        Ok(count)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_dual_mode_read() {
        let endpoint = MockEndpoint::new("mock", |_| vec![0xAA, 0xBB, 0xCC]);

        assert_eq!(endpoint.write(&[0x01]).await.unwrap(), 1);
        assert_eq!(endpoint.read(&mut []).await.unwrap(), 3);

        let mut chunk = [0u8; 2];
        assert_eq!(endpoint.read(&mut chunk).await.unwrap(), 2);
        assert_eq!(chunk, [0xAA, 0xBB]);
        assert_eq!(endpoint.read(&mut []).await.unwrap(), 1);

        let mut rest = [0u8; 1];
        assert_eq!(endpoint.read(&mut rest).await.unwrap(), 1);
        assert_eq!(rest, [0xCC]);
        assert_eq!(endpoint.read(&mut []).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_response_replaced_per_write() {
        let endpoint = MockEndpoint::new("mock", |request| vec![request[0]]);

        endpoint.write(&[0x11]).await.unwrap();
        endpoint.write(&[0x22]).await.unwrap();

        let mut byte = [0u8; 1];
        endpoint.read(&mut byte).await.unwrap();
        assert_eq!(byte, [0x22]);
    }
}
