//! Cache Metrics Collection
//!
//! Hit/miss and eviction counters for monitoring cache health, with a
//! Prometheus text exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    rejected_puts: AtomicU64,
    evictions: AtomicU64,
    reclaimed: AtomicU64,
    pins: AtomicU64,
    unpins: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_put(&self) {
        self.rejected_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reclaimed(&self, count: u64) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_pin(&self) {
        self.pins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unpin(&self) {
        self.unpins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            puts: self.puts.load(Ordering::Relaxed),
            rejected_puts: self.rejected_puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            pins: self.pins.load(Ordering::Relaxed),
            unpins: self.unpins.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.rejected_puts,
            &self.evictions,
            &self.reclaimed,
            &self.pins,
            &self.unpins,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time snapshot of cache metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub puts: u64,
    /// Puts dropped because the cache was full
    pub rejected_puts: u64,
    pub evictions: u64,
    /// Entries dropped by reclaim cycles
    pub reclaimed: u64,
    pub pins: u64,
    pub unpins: u64,
}

impl MetricsSnapshot {
    fn events(&self) -> [(&'static str, u64); 8] {
        [
            ("hit", self.hits),
            ("miss", self.misses),
            ("put", self.puts),
            ("rejected_put", self.rejected_puts),
            ("eviction", self.evictions),
            ("reclaimed", self.reclaimed),
            ("pin", self.pins),
            ("unpin", self.unpins),
        ]
    }
}

/// Publishes cache snapshots in the Prometheus text format
pub struct PrometheusExporter {
    registry: Registry,
    events: IntGaugeVec,
    entries: IntGaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let events = IntGaugeVec::new(
            Opts::new("nucleus_l2_cache_events", "Level-2 cache events by kind"),
            &["cache", "event"],
        )
        .map_err(prometheus_error)?;
        let entries = IntGaugeVec::new(
            Opts::new("nucleus_l2_cache_entries", "Objects held by the Level-2 cache"),
            &["cache", "state"],
        )
        .map_err(prometheus_error)?;

        registry
            .register(Box::new(events.clone()))
            .map_err(prometheus_error)?;
        registry
            .register(Box::new(entries.clone()))
            .map_err(prometheus_error)?;

        Ok(Self {
            registry,
            events,
            entries,
        })
    }

    /// Record the latest snapshot and sizes for `cache`
    pub fn observe(&self, cache: &str, snapshot: &MetricsSnapshot, pinned: usize, unpinned: usize) {
        for (event, value) in snapshot.events() {
            self.events
                .with_label_values(&[cache, event])
                .set(value as i64);
        }
        self.entries
            .with_label_values(&[cache, "pinned"])
            .set(pinned as i64);
        self.entries
            .with_label_values(&[cache, "unpinned"])
            .set(unpinned as i64);
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prometheus_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prometheus_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_ratio(), 0.0);

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert!((metrics.hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_put();
        metrics.record_rejected_put();
        metrics.record_evictions(3);
        metrics.record_reclaimed(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.puts, 1);
        assert_eq!(snapshot.rejected_puts, 1);
        assert_eq!(snapshot.evictions, 3);
        assert_eq!(snapshot.reclaimed, 2);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_prometheus_render() {
        let exporter = PrometheusExporter::new().unwrap();
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        exporter.observe("nucleus", &metrics.snapshot(), 1, 4);

        let text = exporter.render().unwrap();
        assert!(text.contains("nucleus_l2_cache_events"));
        assert!(text.contains("event=\"hit\""));
        assert!(text.contains("state=\"unpinned\""));
    }
}
