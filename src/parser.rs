//! Composable response validators.
//!
//! A pipeline is an ordered list of `(request, response)` validators. The
//! modbus layer prepends the standard sanity checks; each typed operation
//! appends its own format check. Evaluation is sequential and stops at the
//! first fault; a pipeline is side-effect-free on success.

use std::fmt;
use std::sync::Arc;

use crate::error::ProtocolFault;

/// A single response validator.
pub type ParseResponse = dyn Fn(&[u8], &[u8]) -> Result<(), ProtocolFault> + Send + Sync;

/// Ordered validator pipeline.
///
/// Cloning shares the validators themselves but never the list:
/// [`prepended`](Self::prepended) and [`appended`](Self::appended) build a
/// fresh list each time, so a derived pipeline cannot mutate the one it was
/// derived from.
#[derive(Clone, Default)]
pub struct ParserPipeline {
    parsers: Vec<Arc<ParseResponse>>,
}

impl ParserPipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// New pipeline with `parser` inserted before the existing validators.
    pub fn prepended(
        &self,
        parser: impl Fn(&[u8], &[u8]) -> Result<(), ProtocolFault> + Send + Sync + 'static,
    ) -> Self {
        let mut parsers: Vec<Arc<ParseResponse>> = Vec::with_capacity(self.parsers.len() + 1);
        parsers.push(Arc::new(parser));
        parsers.extend(self.parsers.iter().cloned());
        Self { parsers }
    }

    /// New pipeline with `parser` appended after the existing validators.
    pub fn appended(
        &self,
        parser: impl Fn(&[u8], &[u8]) -> Result<(), ProtocolFault> + Send + Sync + 'static,
    ) -> Self {
        let mut parsers = self.parsers.clone();
        parsers.push(Arc::new(parser));
        Self { parsers }
    }

    /// Run the validators in composition order, stopping at the first fault.
    pub fn run(&self, request: &[u8], response: &[u8]) -> Result<(), ProtocolFault> {
        for parser in &self.parsers {
            parser(request, response)?;
        }
        Ok(())
    }

    /// Number of validators in the pipeline.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// `true` when no validators are installed.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl fmt::Debug for ParserPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserPipeline")
            .field("parsers", &self.parsers.len())
            .finish()
    }
}
