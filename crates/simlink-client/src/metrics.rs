//! Client metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of the client's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Envelopes pulled from the message source.
    pub envelopes_received: u64,

    /// Envelopes that went through a full dispatch pass.
    pub envelopes_dispatched: u64,

    /// Envelopes that carried a stream error.
    pub envelopes_errored: u64,

    /// State payloads that could not be decoded.
    pub decode_failures: u64,

    /// Handler invocations that panicked.
    pub handler_panics: u64,

    /// Subscription predicates that panicked.
    pub predicate_panics: u64,

    /// Deliveries dropped because a subscription queue was full.
    pub subscription_drops: u64,

    /// Connect attempts made.
    pub connect_attempts: u64,

    /// Connect attempts that failed or timed out.
    pub connect_failures: u64,

    /// Sessions that reached the ready state.
    pub sessions_opened: u64,

    /// Reconnect cycles started after a session ended.
    pub reconnects: u64,

    /// Average dispatch pass duration, in microseconds.
    pub average_dispatch_us: u64,
}

/// Lock-free counters updated from the dispatch task and caller tasks.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    pub(crate) envelopes_received: AtomicU64,
    pub(crate) envelopes_dispatched: AtomicU64,
    pub(crate) envelopes_errored: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
    pub(crate) predicate_panics: AtomicU64,
    pub(crate) subscription_drops: AtomicU64,
    pub(crate) connect_attempts: AtomicU64,
    pub(crate) connect_failures: AtomicU64,
    pub(crate) sessions_opened: AtomicU64,
    pub(crate) reconnects: AtomicU64,

    /// Exponential moving average in microseconds.
    avg_dispatch_us: AtomicU64,
}

impl ClientMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one dispatch duration into the moving average.
    pub(crate) fn record_dispatch_us(&self, elapsed_us: u64) {
        let current = self.avg_dispatch_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            elapsed_us
        } else {
            // alpha = 0.1
            current.saturating_mul(9).saturating_add(elapsed_us) / 10
        };
        self.avg_dispatch_us.store(new_avg, Ordering::Relaxed);
    }

    /// Reads every counter into a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            envelopes_received: self.envelopes_received.load(Ordering::Relaxed),
            envelopes_dispatched: self.envelopes_dispatched.load(Ordering::Relaxed),
            envelopes_errored: self.envelopes_errored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            predicate_panics: self.predicate_panics.load(Ordering::Relaxed),
            subscription_drops: self.subscription_drops.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            average_dispatch_us: self.avg_dispatch_us.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.envelopes_received,
            &self.envelopes_dispatched,
            &self.envelopes_errored,
            &self.decode_failures,
            &self.handler_panics,
            &self.predicate_panics,
            &self.subscription_drops,
            &self.connect_attempts,
            &self.connect_failures,
            &self.sessions_opened,
            &self.reconnects,
            &self.avg_dispatch_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_and_reset() {
        let metrics = ClientMetrics::new();
        ClientMetrics::incr(&metrics.subscription_drops);
        ClientMetrics::incr(&metrics.subscription_drops);
        ClientMetrics::incr(&metrics.handler_panics);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subscription_drops, 2);
        assert_eq!(snapshot.handler_panics, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_dispatch_average_saturates() {
        let metrics = ClientMetrics::new();
        metrics.record_dispatch_us(100);
        assert_eq!(metrics.snapshot().average_dispatch_us, 100);
        metrics.record_dispatch_us(200);
        assert_eq!(metrics.snapshot().average_dispatch_us, 110);

        metrics.record_dispatch_us(u64::MAX);
        metrics.record_dispatch_us(u64::MAX);
        assert!(metrics.snapshot().average_dispatch_us > 0);
    }
}
