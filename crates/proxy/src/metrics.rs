//! Per-call savings and connection-health counters.
//!
//! Written only from handler context; reads may happen from anywhere, so
//! the counters are relaxed atomics rather than lock-guarded state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters tracking token savings and upstream health.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total_calls: AtomicU64,
    projection_calls: AtomicU64,
    search_calls: AtomicU64,
    auto_truncation_calls: AtomicU64,
    total_original_chars: AtomicU64,
    total_filtered_chars: AtomicU64,
    active_connections: AtomicU64,
    failed_connections: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Total tool calls handled.
    pub total_calls: u64,
    /// Calls that ran a projection.
    pub projection_calls: u64,
    /// Calls that ran a search.
    pub search_calls: u64,
    /// Calls whose response was auto-truncated.
    pub auto_truncation_calls: u64,
    /// Characters received from upstreams.
    pub total_original_chars: u64,
    /// Characters actually returned to the client.
    pub total_filtered_chars: u64,
    /// Characters saved.
    pub chars_saved: u64,
    /// Percentage saved, rounded to two decimals.
    pub savings_percent: f64,
    /// Live upstream connections.
    pub active_connections: u64,
    /// Upstreams that never initialized or were lost.
    pub failed_connections: u64,
}

impl ProxyMetrics {
    /// Records one handled call.
    pub fn record_call(
        &self,
        original_chars: usize,
        filtered_chars: usize,
        used_projection: bool,
        used_search: bool,
        auto_truncated: bool,
    ) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_original_chars
            .fetch_add(original_chars as u64, Ordering::Relaxed);
        self.total_filtered_chars
            .fetch_add(filtered_chars as u64, Ordering::Relaxed);

        if used_projection {
            self.projection_calls.fetch_add(1, Ordering::Relaxed);
        }
        if used_search {
            self.search_calls.fetch_add(1, Ordering::Relaxed);
        }
        if auto_truncated {
            self.auto_truncation_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Marks one upstream as connected.
    pub fn connection_established(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one upstream connection attempt as failed.
    pub fn connection_failed(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one previously live upstream as lost.
    pub fn connection_lost(&self) {
        let mut current = self.active_connections.load(Ordering::Relaxed);
        while current > 0 {
            match self.active_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of all counters.
    pub fn summary(&self) -> MetricsSummary {
        let original = self.total_original_chars.load(Ordering::Relaxed);
        let filtered = self.total_filtered_chars.load(Ordering::Relaxed);
        let saved = original.saturating_sub(filtered);

        let savings_percent = if original == 0 {
            0.0
        } else {
            (saved as f64 / original as f64 * 10_000.0).round() / 100.0
        };

        MetricsSummary {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            projection_calls: self.projection_calls.load(Ordering::Relaxed),
            search_calls: self.search_calls.load(Ordering::Relaxed),
            auto_truncation_calls: self.auto_truncation_calls.load(Ordering::Relaxed),
            total_original_chars: original,
            total_filtered_chars: filtered,
            chars_saved: saved,
            savings_percent,
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
        }
    }

    /// Logs the performance summary, typically once at shutdown.
    pub fn log_summary(&self) {
        let summary = self.summary();
        if summary.total_calls == 0 {
            return;
        }

        log::info!("=== Proxy Performance Summary ===");
        log::info!("  Total calls: {}", summary.total_calls);
        log::info!("  Projection calls: {}", summary.projection_calls);
        log::info!("  Search calls: {}", summary.search_calls);
        log::info!("  Auto-truncated: {}", summary.auto_truncation_calls);
        log::info!("  Original chars: {}", summary.total_original_chars);
        log::info!("  Filtered chars: {}", summary.total_filtered_chars);
        log::info!("  Chars saved: {}", summary.chars_saved);
        log::info!("  Savings: {:.1}%", summary.savings_percent);
        log::info!("  Active connections: {}", summary.active_connections);
        log::info!("  Failed connections: {}", summary.failed_connections);
    }
}

#[cfg(test)]
mod tests {
    use super::ProxyMetrics;

    #[test]
    fn record_call_accumulates() {
        let metrics = ProxyMetrics::default();
        metrics.record_call(1000, 100, false, false, true);
        metrics.record_call(500, 500, true, false, false);
        metrics.record_call(200, 50, false, true, false);

        let summary = metrics.summary();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.projection_calls, 1);
        assert_eq!(summary.search_calls, 1);
        assert_eq!(summary.auto_truncation_calls, 1);
        assert_eq!(summary.total_original_chars, 1700);
        assert_eq!(summary.total_filtered_chars, 650);
        assert_eq!(summary.chars_saved, 1050);
    }

    #[test]
    fn savings_percent_rounds_to_two_decimals() {
        let metrics = ProxyMetrics::default();
        metrics.record_call(3, 1, false, false, false);

        assert_eq!(metrics.summary().savings_percent, 66.67);
    }

    #[test]
    fn zero_calls_has_zero_savings() {
        let metrics = ProxyMetrics::default();
        assert_eq!(metrics.summary().savings_percent, 0.0);
    }

    #[test]
    fn connection_counters() {
        let metrics = ProxyMetrics::default();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_failed();
        metrics.connection_lost();

        let summary = metrics.summary();
        assert_eq!(summary.active_connections, 1);
        assert_eq!(summary.failed_connections, 2);
    }

    #[test]
    fn connection_lost_does_not_underflow() {
        let metrics = ProxyMetrics::default();
        metrics.connection_lost();
        assert_eq!(metrics.summary().active_connections, 0);
    }
}
