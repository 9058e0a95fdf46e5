//! Process-wide serialization of exchanges per serial port.
//!
//! One asynchronous mutex per port name, created on first use and kept for
//! the lifetime of the process. Port names are bounded by hardware, so the
//! registry only grows by insert-if-absent and never shrinks. Acquisition
//! is blocking with no timeout; fairness across waiters is whatever the
//! runtime scheduler provides; only mutual exclusion is guaranteed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

static PORT_LOCKS: Lazy<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_for(port: &str) -> Arc<AsyncMutex<()>> {
    let mut locks = PORT_LOCKS.lock().expect("port lock registry poisoned");
    locks.entry(port.to_string()).or_default().clone()
}

/// Acquire the exclusive right to exchange on `port`.
///
/// The returned guard releases the port on drop, which covers every early
/// return, error path and panic unwind. Recursive acquisition from the same
/// task deadlocks, as the registry intends.
pub async fn acquire(port: &str) -> OwnedMutexGuard<()> {
    lock_for(port).lock_owned().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_port_excludes() {
        let guard = acquire("test-portlock-a").await;
        let second = tokio::time::timeout(
            Duration::from_millis(20),
            acquire("test-portlock-a"),
        )
        .await;
        assert!(second.is_err(), "second acquire must block while held");
        drop(guard);

        let third = tokio::time::timeout(
            Duration::from_millis(20),
            acquire("test-portlock-a"),
        )
        .await;
        assert!(third.is_ok(), "lock must be re-acquirable after release");
    }

    #[tokio::test]
    async fn test_distinct_ports_are_independent() {
        let _a = acquire("test-portlock-b").await;
        let b = tokio::time::timeout(
            Duration::from_millis(20),
            acquire("test-portlock-c"),
        )
        .await;
        assert!(b.is_ok(), "different port names must not contend");
    }
}
