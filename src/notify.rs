//! Process-wide exchange side channels.
//!
//! Two globals feed observers of the wire traffic: a notification slot
//! holding at most one callback, and a flag enabling per-attempt log
//! records. Both may be flipped from any thread while exchanges run; slot
//! readers are lock-free so installing a callback never stalls the engine.
//! The callback itself is invoked on a detached task once per attempt and
//! is never awaited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;

/// Everything the engine reports about one attempt.
#[derive(Debug, Clone)]
pub struct ExchangeEvent {
    /// Copy of the request frame.
    pub request: Vec<u8>,
    /// Copy of the response bytes, possibly empty.
    pub response: Vec<u8>,
    /// Rendered error chain, if the attempt failed.
    pub error: Option<String>,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Zero-based attempt index.
    pub attempt: usize,
    /// Endpoint name, empty when the endpoint does not report one.
    pub port: String,
}

/// Notification callback type.
pub type NotifyFn = dyn Fn(ExchangeEvent) + Send + Sync;

struct NotifySlot(Box<NotifyFn>);

static NOTIFY: Lazy<ArcSwapOption<NotifySlot>> = Lazy::new(ArcSwapOption::empty);
static LOG_ENABLED: AtomicBool = AtomicBool::new(true);

/// Install the process-wide notification callback, replacing any previous
/// one.
pub fn set_notify(f: impl Fn(ExchangeEvent) + Send + Sync + 'static) {
    NOTIFY.store(Some(Arc::new(NotifySlot(Box::new(f)))));
}

/// Remove the notification callback.
pub fn clear_notify() {
    NOTIFY.store(None);
}

/// Enable or disable per-attempt log records. Enabled by default.
pub fn set_log_enabled(enable: bool) {
    LOG_ENABLED.store(enable, Ordering::Relaxed);
}

pub(crate) fn log_enabled() -> bool {
    LOG_ENABLED.load(Ordering::Relaxed)
}

/// Fire-and-forget delivery of an attempt record to the notification slot.
pub(crate) fn notify(event: ExchangeEvent) {
    if let Some(slot) = NOTIFY.load_full() {
        tokio::spawn(async move { (slot.0)(event) });
    }
}

/// Render bytes the way instrument traffic is usually logged: upper-case
/// hex, space separated.
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_format() {
        assert_eq!(hex(&[0x01, 0xA3, 0x00]), "01 A3 00");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_log_flag() {
        set_log_enabled(false);
        assert!(!log_enabled());
        set_log_enabled(true);
        assert!(log_enabled());
    }
}
