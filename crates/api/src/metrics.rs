use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Process-level counters, shared across handlers.
pub struct Metrics {
    total_queries: AtomicUsize,
    successful_queries: AtomicUsize,
    failed_queries: AtomicUsize,
    documents_indexed: AtomicUsize,

    // Timing (in microseconds)
    total_query_time_us: AtomicU64,
    total_ingest_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_queries: AtomicUsize::new(0),
            successful_queries: AtomicUsize::new(0),
            failed_queries: AtomicUsize::new(0),
            documents_indexed: AtomicUsize::new(0),
            total_query_time_us: AtomicU64::new(0),
            total_ingest_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_query(&self, duration: std::time::Duration, success: bool) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_queries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_ingest(&self, duration: std::time::Duration, documents: usize) {
        self.documents_indexed.fetch_add(documents, Ordering::Relaxed);
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_queries = self.total_queries.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_queries,
            successful_queries: self.successful_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            avg_query_time_ms: avg_ms(&self.total_query_time_us, total_queries),
            avg_ingest_time_ms: avg_ms(
                &self.total_ingest_time_us,
                self.documents_indexed.load(Ordering::Relaxed),
            ),
        }
    }
}

fn avg_ms(total_us: &AtomicU64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub documents_indexed: usize,
    pub avg_query_time_ms: f64,
    pub avg_ingest_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_reflects_recorded_queries() {
        let metrics = Metrics::new();
        metrics.record_query(Duration::from_millis(10), true);
        metrics.record_query(Duration::from_millis(30), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 2);
        assert_eq!(snapshot.successful_queries, 1);
        assert_eq!(snapshot.failed_queries, 1);
        assert!(snapshot.avg_query_time_ms >= 19.0 && snapshot.avg_query_time_ms <= 21.0);
    }
}
