use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide operational counters, scraped by an external sink through
/// `snapshot`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    messages_failed: AtomicU64,
    throttle_events: AtomicU64,
    attachment_delay_applied: AtomicU64,
    batch_duration_micros: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttle_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attachment_delay(&self) {
        self.attachment_delay_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_duration(&self, duration: Duration) {
        self.batch_duration_micros
            .store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            throttle_events: self.throttle_events.load(Ordering::Relaxed),
            attachment_delay_applied: self.attachment_delay_applied.load(Ordering::Relaxed),
            batch_duration_seconds: self.batch_duration_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_failed: u64,
    pub throttle_events: u64,
    pub attachment_delay_applied: u64,
    pub batch_duration_seconds: f64,
}
