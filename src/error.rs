//! Core error types and result handling.
//!
//! Errors come in two layers. [`ProtocolFault`] covers wire-level response
//! validation failures; the exchange engine retries these while attempts
//! remain. [`CommError`] is the caller-facing family covering everything a
//! call can die of: cancellation, the final "no response" verdict, endpoint
//! I/O failures, partial transfers, protocol faults, value-decode failures
//! and caller-side misconfiguration.
//!
//! Context is layered onto a causal error with [`CommError::context`]; the
//! chain stays inspectable through [`CommError::root`] and the family
//! predicates, so callers can test either the timeout dimension or the
//! protocol dimension of a failure.

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type CommResult<T> = Result<T, CommError>;

/// Wire-level response validation failure.
///
/// Every fault of this family triggers a retry if the exchange has attempts
/// left; the engine sleeps one inter-byte quantum between retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    /// The response is shorter than the minimal frame of address, function
    /// code and CRC.
    #[error("response is {got} bytes, shorter than the minimal frame")]
    ShortResponse { got: usize },

    /// CRC16 over the full response frame is not zero.
    #[error("CRC16 of response is not zero")]
    CrcMismatch,

    /// The response carries a different slave address than the request.
    #[error("slave address mismatch: requested {requested:#04X}, got {got:#04X}")]
    AddressMismatch { requested: u8, got: u8 },

    /// The response carries a different function code than the request.
    #[error("function code mismatch: requested {requested:#04X}, got {got:#04X}")]
    FunctionCodeMismatch { requested: u8, got: u8 },

    /// The device answered with an exception frame.
    #[error("device exception code {code}")]
    DeviceException { code: u8 },

    /// The response length does not match what the operation demands.
    #[error("response length {got}, expected {expected}")]
    LengthMismatch { expected: usize, got: usize },

    /// The write-32 echo window `response[2..6]` differs from the request.
    #[error("echo mismatch: request[2..6]=[{requested}] response[2..6]=[{got}]")]
    EchoMismatch { requested: String, got: String },
}

/// Errors produced by the exchange engine and the framing layer.
#[derive(Debug, Error)]
pub enum CommError {
    /// The exchange was interrupted by external cancellation.
    #[error("interrupted")]
    Cancelled,

    /// No complete response arrived within `response_timeout` on the last
    /// attempt. Part of the serial-protocol family.
    #[error("no response")]
    NoResponse,

    /// The underlying byte stream failed.
    #[error("endpoint error: {0}")]
    Endpoint(#[source] io::Error),

    /// The endpoint accepted fewer bytes than the request frame holds.
    #[error("wrote {written} bytes of {expected}")]
    ShortWrite { written: usize, expected: usize },

    /// The endpoint delivered fewer bytes than it reported available.
    #[error("read {got} bytes of {expected}")]
    ShortRead { got: usize, expected: usize },

    /// A response validator rejected the frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolFault),

    /// A numeric field of an otherwise valid response failed to decode.
    /// Raised after the exchange completed; never retried.
    #[error("not a number ({format}): {bytes}")]
    BadValue { format: &'static str, bytes: String },

    /// Caller-side misuse: unknown format, undersized buffer and the like.
    #[error("configuration error: {0}")]
    Config(String),

    /// A context frame layered onto a causal error.
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<CommError>,
    },
}

impl CommError {
    /// Layer a human-readable context frame onto the error.
    pub fn context(self, context: impl Into<String>) -> Self {
        CommError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The root cause below every context frame.
    pub fn root(&self) -> &CommError {
        match self {
            CommError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// `true` when the root cause belongs to the serial-protocol family:
    /// a wire-level fault or the final "no response" verdict.
    pub fn is_protocol(&self) -> bool {
        matches!(self.root(), CommError::Protocol(_) | CommError::NoResponse)
    }

    /// `true` when the call ultimately timed out with no complete response.
    pub fn is_no_response(&self) -> bool {
        matches!(self.root(), CommError::NoResponse)
    }

    /// `true` when the call was interrupted by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), CommError::Cancelled)
    }

    /// The wire-level fault at the root of the chain, if any.
    pub fn protocol_fault(&self) -> Option<&ProtocolFault> {
        match self.root() {
            CommError::Protocol(fault) => Some(fault),
            _ => None,
        }
    }

    /// The error message joined with every context frame above the root,
    /// outermost first.
    pub fn chain(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_preserves_root() {
        let err = CommError::Protocol(ProtocolFault::CrcMismatch)
            .context("modbus address=1 command=3")
            .context("register 0: 2 registers");

        assert!(err.is_protocol());
        assert!(!err.is_no_response());
        assert_eq!(err.protocol_fault(), Some(&ProtocolFault::CrcMismatch));
        assert!(err.chain().contains("CRC16"));
        assert!(err.chain().starts_with("register 0"));
    }

    #[test]
    fn test_no_response_is_both_timeout_and_protocol() {
        let err = CommError::NoResponse.context("request=`01 03`");
        assert!(err.is_no_response());
        assert!(err.is_protocol());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_not_protocol() {
        let err = CommError::Cancelled.context("request=`01 03`");
        assert!(err.is_cancelled());
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_endpoint_error_keeps_cause() {
        let err = CommError::Endpoint(io::Error::new(io::ErrorKind::BrokenPipe, "port gone"));
        assert!(!err.is_protocol());
        assert!(err.chain().contains("port gone"));
    }
}
