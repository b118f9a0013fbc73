//! Request latency histogram for the ingestion loop.
//! Records time from issuing a page/book request to a decoded body.

use std::time::Duration;

use tracing::info;

/// Values stored in milliseconds.
pub struct FetchLatency {
    inner: Option<hdrhistogram::Histogram<u64>>,
}

impl FetchLatency {
    /// Tracks 1ms to 10min, 3 significant figures.
    pub fn new() -> Self {
        Self {
            inner: hdrhistogram::Histogram::new_with_bounds(1, 600_000, 3).ok(),
        }
    }

    pub fn record(&mut self, d: Duration) {
        let ms = d.as_millis().clamp(1, 600_000) as u64;
        if let Some(h) = self.inner.as_mut() {
            let _ = h.record(ms);
        }
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> Option<(u64, u64, u64)> {
        let h = self.inner.as_ref()?;
        if h.len() == 0 {
            return None;
        }
        Some((
            h.value_at_quantile(0.5),
            h.value_at_quantile(0.95),
            h.value_at_quantile(0.99),
        ))
    }

    pub fn len(&self) -> u64 {
        self.inner.as_ref().map(|h| h.len()).unwrap_or(0)
    }

    pub fn log_summary(&self, what: &str) {
        if let Some((p50, p95, p99)) = self.percentiles() {
            info!(
                what,
                samples = self.len(),
                p50_ms = p50,
                p95_ms = p95,
                p99_ms = p99,
                "{what} latency: p50={p50}ms p95={p95}ms p99={p99}ms over {} requests",
                self.len(),
            );
        }
    }
}

impl Default for FetchLatency {
    fn default() -> Self {
        Self::new()
    }
}
