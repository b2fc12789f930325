//! Advisory counters for the copilot pipeline.
//!
//! Telemetry is observational only: it never affects control flow and
//! nothing depends on it for correctness.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

#[derive(Debug, Default)]
pub struct Telemetry {
    pub llm_calls: AtomicU64,
    pub llm_errors: AtomicU64,
    pub planned: AtomicU64,
    pub executed: AtomicU64,
    pub fallbacks: AtomicU64,
    pub rag_answers: AtomicU64,
    pub route_bypasses: AtomicU64,
    last_error: Mutex<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub llm_calls: u64,
    pub llm_errors: u64,
    pub planned: u64,
    pub executed: u64,
    pub fallbacks: u64,
    pub rag_answers: u64,
    pub route_bypasses: u64,
    pub last_error: String,
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, err: &dyn std::fmt::Display) {
        self.llm_errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = err.to_string();
        }
    }

    /// A conceptual-sounding query was answered by a non-rag_search tool.
    pub fn record_bypass(&self, query: &str, tool: &str) {
        self.route_bypasses.fetch_add(1, Ordering::Relaxed);
        warn!(%tool, %query, "conceptual query bypassed the knowledge base");
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_errors: self.llm_errors.load(Ordering::Relaxed),
            planned: self.planned.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            rag_answers: self.rag_answers.load(Ordering::Relaxed),
            route_bypasses: self.route_bypasses.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .map(|s| s.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let telemetry = Telemetry::new();
        telemetry.llm_calls.fetch_add(2, Ordering::Relaxed);
        telemetry.fallbacks.fetch_add(1, Ordering::Relaxed);
        telemetry.record_error(&"boom");

        let snap = telemetry.snapshot();
        assert_eq!(snap.llm_calls, 2);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.llm_errors, 1);
        assert_eq!(snap.last_error, "boom");
    }

    #[test]
    fn test_bypass_counter() {
        let telemetry = Telemetry::new();
        telemetry.record_bypass("what is arpu", "get_roi_by_strategy");
        assert_eq!(telemetry.snapshot().route_bypasses, 1);
    }
}
