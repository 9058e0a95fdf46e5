//! The serial exchange engine.
//!
//! One [`Exchange`] value describes how to run request/response cycles
//! against an endpoint: the two-tier timeouts, the retry budget, the
//! validator pipeline, the port-lock key and the cancellation token. The
//! engine writes the request, assembles the response from the endpoint's
//! receive queue, validates it, and retries on protocol faults until the
//! attempt budget is spent.
//!
//! ## Two-tier timeouts
//!
//! `response_timeout` is the hard ceiling on waiting for the device to
//! answer at all, measured from the end of the write. `inter_byte_timeout`
//! is the quiet-gap heuristic that marks a response as complete: once bytes
//! have started arriving, the frame is delivered when the line stays quiet
//! for one inter-byte quantum. The two must not be collapsed into one
//! timer: a long response whose bytes keep arriving inside the quantum may
//! legitimately outlive the response timeout, and its delivery wins the
//! race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{CommError, CommResult, ProtocolFault};
use crate::notify::{self, hex, ExchangeEvent};
use crate::parser::ParserPipeline;
use crate::portlock;

/// Poll period while the endpoint's receive queue is empty.
const RECEIVE_POLL: Duration = Duration::from_millis(1);

/// Timing and retry knobs for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Hard ceiling on the waiting phase of one attempt, measured from the
    /// end of the write.
    pub response_timeout: Duration,
    /// Longest quiet gap between response bytes before the frame counts as
    /// complete; doubles as the cooldown before a retry and as the backoff
    /// while the endpoint reports a pending write.
    pub inter_byte_timeout: Duration,
    /// Number of write/await/validate attempts. Values below 1 are read
    /// as 1.
    pub max_read_attempts: usize,
    /// Optional settle delay before the write of every attempt.
    pub pre_exchange_pause: Duration,
}

impl ExchangeConfig {
    /// Config with the two timeouts set and a single attempt.
    pub fn new(response_timeout: Duration, inter_byte_timeout: Duration) -> Self {
        Self {
            response_timeout,
            inter_byte_timeout,
            max_read_attempts: 1,
            pre_exchange_pause: Duration::ZERO,
        }
    }

    /// Set the attempt budget.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.max_read_attempts = attempts;
        self
    }

    /// Set the pre-exchange pause.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pre_exchange_pause = pause;
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.max_read_attempts.max(1)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            inter_byte_timeout: Duration::from_millis(50),
            max_read_attempts: 1,
            pre_exchange_pause: Duration::ZERO,
        }
    }
}

/// One attempt's terminal state before retry classification.
enum Outcome {
    /// Complete response that passed every validator.
    Ok(Vec<u8>),
    /// Complete response rejected by a validator; retryable.
    Fault(ProtocolFault, Vec<u8>),
    /// The overall deadline elapsed first; retryable.
    Timeout,
    /// Non-retryable failure: endpoint error, partial transfer or
    /// cancellation.
    Fatal(CommError, Vec<u8>),
}

/// What the assembly worker hands back over its one-shot channel.
enum Delivery {
    Complete(Vec<u8>),
    Failed(CommError, Vec<u8>),
}

/// A fully described request/response cycle.
///
/// `Exchange` is a value object: every `with_*` method consumes the value
/// and returns a derived copy. Derivation never shares mutable state (in
/// particular, adding a validator builds a fresh pipeline), so call-site
/// customisation cannot leak into other holders of the original.
#[derive(Clone)]
pub struct Exchange {
    endpoint: Arc<dyn Endpoint>,
    config: ExchangeConfig,
    parsers: ParserPipeline,
    port_key: Option<String>,
    cancel: CancellationToken,
}

impl Exchange {
    /// Exchange over `endpoint` with the given knobs, no validators, no
    /// port lock and a fresh (never fired) cancellation token.
    pub fn new(endpoint: Arc<dyn Endpoint>, config: ExchangeConfig) -> Self {
        Self {
            endpoint,
            config,
            parsers: ParserPipeline::new(),
            port_key: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Derived exchange over a different endpoint.
    pub fn with_endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Derived exchange with different knobs.
    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Serialize this exchange against every other exchange carrying the
    /// same key. An empty key disables locking.
    pub fn with_port_lock(mut self, port: impl Into<String>) -> Self {
        self.port_key = Some(port.into());
        self
    }

    /// Honor `cancel` at every suspension point of the exchange.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derived exchange with `parser` running before the current pipeline.
    pub fn with_prepended_parser(
        mut self,
        parser: impl Fn(&[u8], &[u8]) -> Result<(), ProtocolFault> + Send + Sync + 'static,
    ) -> Self {
        self.parsers = self.parsers.prepended(parser);
        self
    }

    /// Derived exchange with `parser` running after the current pipeline.
    pub fn with_appended_parser(
        mut self,
        parser: impl Fn(&[u8], &[u8]) -> Result<(), ProtocolFault> + Send + Sync + 'static,
    ) -> Self {
        self.parsers = self.parsers.appended(parser);
        self
    }

    /// The timing knobs in force.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// The endpoint this exchange drives.
    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    /// Run the full exchange for `request` and return the response frame.
    ///
    /// Takes the per-port lock first when a lock key is set, performs up to
    /// `max_read_attempts` write/await/validate cycles, and releases the
    /// lock on every exit path. Errors crossing this boundary carry the
    /// request hex, the timing knobs and the response bytes if any.
    pub async fn get_response(&self, request: &[u8]) -> CommResult<Vec<u8>> {
        let _guard = match self.port_key.as_deref() {
            Some(port) if !port.is_empty() => Some(portlock::acquire(port).await),
            _ => None,
        };

        let (response, result) = self.run_attempts(request).await;
        match result {
            Ok(()) => Ok(response),
            Err(err) => Err(self.enrich(err, request, &response)),
        }
    }

    /// All attempts of one call; returns the last response bytes alongside
    /// the verdict so the enrichment layer can include them.
    async fn run_attempts(&self, request: &[u8]) -> (Vec<u8>, Result<(), CommError>) {
        let mut last: Option<(CommError, Vec<u8>)> = None;

        for attempt in 0..self.config.attempts() {
            let started = Instant::now();
            let outcome = self.run_one(request).await;
            self.report(request, &outcome, started, attempt);

            match outcome {
                Outcome::Ok(response) => return (response, Ok(())),
                Outcome::Fault(fault, response) => {
                    let remaining = attempt + 1 < self.config.attempts();
                    if remaining && !self.pause(self.config.inter_byte_timeout).await {
                        return (response, Err(CommError::Cancelled));
                    }
                    last = Some((CommError::Protocol(fault), response));
                }
                Outcome::Timeout => {
                    last = Some((CommError::NoResponse, Vec::new()));
                }
                Outcome::Fatal(err, response) => return (response, Err(err)),
            }
        }

        match last {
            Some((err, response)) => (response, Err(err)),
            // attempts() >= 1 guarantees at least one outcome above
            None => (Vec::new(), Err(CommError::NoResponse)),
        }
    }

    /// One write/await/validate cycle.
    async fn run_one(&self, request: &[u8]) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Fatal(CommError::Cancelled, Vec::new());
        }

        if self.config.pre_exchange_pause > Duration::ZERO
            && !self.pause(self.config.pre_exchange_pause).await
        {
            return Outcome::Fatal(CommError::Cancelled, Vec::new());
        }

        // Write, spinning while the endpoint reports a pending port.
        let write_started = Instant::now();
        loop {
            match self.endpoint.write(request).await {
                Err(err) => return Outcome::Fatal(CommError::Endpoint(err), Vec::new()),
                Ok(0) => {
                    if write_started.elapsed() >= self.config.response_timeout {
                        return Outcome::Timeout;
                    }
                    if !self.pause(self.config.inter_byte_timeout).await {
                        return Outcome::Fatal(CommError::Cancelled, Vec::new());
                    }
                }
                Ok(written) if written != request.len() => {
                    return Outcome::Fatal(
                        CommError::ShortWrite {
                            written,
                            expected: request.len(),
                        },
                        Vec::new(),
                    );
                }
                Ok(_) => break,
            }
        }

        // Race the assembly worker against the overall deadline and
        // external cancellation. The deadline only decides "did the device
        // answer at all": once bytes have started arriving, a frame that
        // keeps filling within the inter-byte quantum is allowed to outlive
        // it, and its delivery wins.
        let worker_token = self.cancel.child_token();
        let started = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = oneshot::channel();
        let worker = tokio::spawn(assemble(
            self.endpoint.clone(),
            self.config.inter_byte_timeout,
            started.clone(),
            worker_token.clone(),
            tx,
        ));

        let outcome = tokio::select! {
            delivered = &mut rx => self.deliver(request, delivered),
            _ = sleep(self.config.response_timeout) => {
                if started.load(Ordering::Relaxed) {
                    tokio::select! {
                        delivered = &mut rx => self.deliver(request, delivered),
                        _ = self.cancel.cancelled() => {
                            Outcome::Fatal(CommError::Cancelled, Vec::new())
                        }
                    }
                } else {
                    Outcome::Timeout
                }
            }
            _ = self.cancel.cancelled() => Outcome::Fatal(CommError::Cancelled, Vec::new()),
        };
        worker_token.cancel();
        drop(worker);
        outcome
    }

    fn deliver(
        &self,
        request: &[u8],
        delivered: Result<Delivery, oneshot::error::RecvError>,
    ) -> Outcome {
        match delivered {
            Ok(Delivery::Complete(response)) => self.validate(request, response),
            Ok(Delivery::Failed(err, partial)) => Outcome::Fatal(err, partial),
            Err(_) => Outcome::Fatal(CommError::Cancelled, Vec::new()),
        }
    }

    fn validate(&self, request: &[u8], response: Vec<u8>) -> Outcome {
        match self.parsers.run(request, &response) {
            Ok(()) => Outcome::Ok(response),
            Err(fault) => Outcome::Fault(fault, response),
        }
    }

    /// One log record and one notification per attempt, whatever the
    /// outcome.
    fn report(&self, request: &[u8], outcome: &Outcome, started: Instant, attempt: usize) {
        let duration = started.elapsed();
        let port = self.endpoint.name();

        let (response, error, cancelled): (&[u8], Option<String>, bool) = match outcome {
            Outcome::Ok(response) => (response, None, false),
            Outcome::Fault(fault, response) => (response, Some(fault.to_string()), false),
            Outcome::Timeout => (&[], Some("response timeout".to_string()), false),
            Outcome::Fatal(err, response) => {
                (response, Some(err.chain()), err.is_cancelled())
            }
        };

        if notify::log_enabled() {
            let frame = if response.is_empty() {
                hex(request)
            } else {
                format!("{} --> {}", hex(request), hex(response))
            };
            match &error {
                None => info!(attempt, port = %port, ?duration, "{frame}"),
                Some(_) if cancelled => {
                    warn!(attempt, port = %port, ?duration, "{frame}: interrupted");
                }
                Some(err) => error!(attempt, port = %port, ?duration, "{frame}: {err}"),
            }
        }

        notify::notify(ExchangeEvent {
            request: request.to_vec(),
            response: response.to_vec(),
            error,
            duration,
            attempt,
            port,
        });
    }

    /// Cancellation-aware sleep; `false` when interrupted.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Layer the request hex, timing knobs and any response bytes onto the
    /// final error.
    fn enrich(&self, err: CommError, request: &[u8], response: &[u8]) -> CommError {
        let cfg = &self.config;
        let mut context = format!(
            "request=`{}` response_timeout={:?} inter_byte_timeout={:?} attempts={}",
            hex(request),
            cfg.response_timeout,
            cfg.inter_byte_timeout,
            cfg.attempts(),
        );
        if !response.is_empty() {
            context.push_str(&format!(" response=`{}`", hex(response)));
        }
        err.context(context)
    }
}

/// Background byte assembly for one attempt.
///
/// Polls the endpoint's receive queue, draining exactly the reported count
/// each round. The quiet deadline starts after the first byte and resets on
/// every chunk; when it elapses with nothing new, the response is complete.
async fn assemble(
    endpoint: Arc<dyn Endpoint>,
    inter_byte: Duration,
    started: Arc<AtomicBool>,
    cancel: CancellationToken,
    tx: oneshot::Sender<Delivery>,
) {
    let mut response = Vec::new();
    let mut quiet_deadline: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        if let Some(deadline) = quiet_deadline {
            if Instant::now() >= deadline {
                let _ = tx.send(Delivery::Complete(response));
                return;
            }
        }

        let available = match endpoint.read(&mut []).await {
            Ok(count) => count,
            Err(err) => {
                let _ = tx.send(Delivery::Failed(CommError::Endpoint(err), response));
                return;
            }
        };

        if available == 0 {
            tokio::select! {
                _ = sleep(RECEIVE_POLL) => {}
                _ = cancel.cancelled() => return,
            }
            continue;
        }

        let mut chunk = vec![0u8; available];
        match endpoint.read(&mut chunk).await {
            Ok(count) if count == available => {
                response.extend_from_slice(&chunk);
                started.store(true, Ordering::Relaxed);
            }
            Ok(count) => {
                let _ = tx.send(Delivery::Failed(
                    CommError::ShortRead {
                        got: count,
                        expected: available,
                    },
                    response,
                ));
                return;
            }
            Err(err) => {
                let _ = tx.send(Delivery::Failed(CommError::Endpoint(err), response));
                return;
            }
        }
        quiet_deadline = Some(Instant::now() + inter_byte);
    }
}
