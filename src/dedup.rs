//! Inbound message deduplication at the at-least-once delivery boundary.
//!
//! The transport may redeliver a message any number of times. The guarantee
//! here is "no duplicate user-visible effect within the TTL window", not
//! permanent exactly-once delivery: entries older than the TTL are treated
//! as unseen again, and redelivery after expiry is absorbed as a new attempt.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a message id is remembered.
const DEDUP_TTL: Duration = Duration::from_secs(10 * 60);

/// Opportunistic sweep threshold: expired entries are purged when the
/// table grows past this size.
const SWEEP_THRESHOLD: usize = 5000;

/// Memoizes recently processed message ids.
///
/// A secondary, session-scoped check (`Session::last_message_id`) sits
/// behind this table.
pub struct InboundDeduplicator {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl InboundDeduplicator {
    pub fn new() -> Self {
        Self::with_ttl(DEDUP_TTL)
    }

    /// Custom TTL, used by tests to exercise expiry without waiting.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
            sweep_threshold: SWEEP_THRESHOLD,
        }
    }

    /// Check-and-record a message id.
    ///
    /// Returns `true` if the id was already processed within the TTL window
    /// (the caller must absorb the message: no reply, no mutation). Expiry
    /// is lazy: a stale entry is overwritten and reported as unseen.
    pub fn processed(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup table lock poisoned");
        let now = Instant::now();

        if let Some(at) = seen.get(message_id) {
            if now.duration_since(*at) < self.ttl {
                return true;
            }
        }

        seen.insert(message_id.to_string(), now);
        if seen.len() > self.sweep_threshold {
            let ttl = self.ttl;
            seen.retain(|_, at| now.duration_since(*at) < ttl);
            tracing::debug!(remaining = seen.len(), "Swept expired dedup entries");
        }
        false
    }

    /// Number of remembered ids (expired entries included until swept).
    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InboundDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
