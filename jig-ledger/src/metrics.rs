//! Metrics collection for observability
//!
//! Each ledger owns its registry, so repeated runs in one process (tests,
//! `debug`) never collide on metric names.
//!
//! # Metrics
//!
//! - `jig_verified_groups_total` - Groups that passed verification
//! - `jig_verify_cache_hits_total` - Authorizations skipped thanks to the cache
//! - `jig_applied_txns_total` - Transactions applied, inner ones included
//! - `jig_blocks_total` - Blocks committed
//! - `jig_commit_duration_seconds` - Histogram of commit latencies

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Groups verified
    pub verified_groups: IntCounter,

    /// Verification cache hits
    pub cache_hits: IntCounter,

    /// Transactions applied
    pub applied_txns: IntCounter,

    /// Blocks committed
    pub blocks_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("verified_groups", &self.verified_groups.get())
            .field("cache_hits", &self.cache_hits.get())
            .field("applied_txns", &self.applied_txns.get())
            .field("blocks_total", &self.blocks_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let verified_groups = IntCounter::new(
            "jig_verified_groups_total",
            "Groups that passed verification",
        )?;
        registry.register(Box::new(verified_groups.clone()))?;

        let cache_hits = IntCounter::new(
            "jig_verify_cache_hits_total",
            "Authorizations skipped by the verified transaction cache",
        )?;
        registry.register(Box::new(cache_hits.clone()))?;

        let applied_txns = IntCounter::new(
            "jig_applied_txns_total",
            "Transactions applied, inner transactions included",
        )?;
        registry.register(Box::new(applied_txns.clone()))?;

        let blocks_total = IntCounter::new("jig_blocks_total", "Blocks committed")?;
        registry.register(Box::new(blocks_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("jig_commit_duration_seconds", "Histogram of commit latencies")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            verified_groups,
            cache_hits,
            applied_txns,
            blocks_total,
            commit_duration,
            registry,
        })
    }

    /// Render in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.blocks_total.inc();
        assert_eq!(a.blocks_total.get(), 1);
        assert_eq!(b.blocks_total.get(), 0);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.applied_txns.inc_by(3);
        metrics.commit_duration.observe(0.002);
        let text = metrics.render();
        assert!(text.contains("jig_applied_txns_total 3"));
        assert!(text.contains("jig_commit_duration_seconds_count 1"));
    }
}
