//! Metric hooks. An [`Engine`](crate::Engine) can be given a
//! [`MetricsSink`]; converters compiled from it report rule errors and
//! per-record row counts to the sink.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter bumped once per rule error: where `on_error` absorbs it, or
/// where it escapes its column.
pub const RULE_ERRORS: &str = "converter.rule_errors";

/// Observation of the number of rows a record produced.
pub const ROWS_PER_RECORD: &str = "converter.rows_per_record";

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, by: u64);

    fn observe(&self, _name: &str, _value: f64) {}
}

/// Optional sink shared by an engine and its converters.
#[derive(Clone, Default)]
pub struct Metrics(Option<Arc<dyn MetricsSink>>);

impl Metrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Metrics(Some(sink))
    }

    pub fn increment(&self, name: &str, by: u64) {
        if let Some(sink) = &self.0 {
            sink.increment(name, by);
        }
    }

    pub fn observe(&self, name: &str, value: f64) {
        if let Some(sink) = &self.0 {
            sink.observe(name, value);
        }
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Metrics").field(&self.0.is_some()).finish()
    }
}

/// Lock-free tallies of the converter's own metrics.
#[derive(Debug, Default)]
pub struct ConverterStats {
    rule_errors: AtomicU64,
    records: AtomicU64,
    rows: AtomicU64,
}

impl ConverterStats {
    pub fn rule_errors(&self) -> u64 {
        self.rule_errors.load(Ordering::Relaxed)
    }

    /// Records that finished conversion.
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

impl MetricsSink for ConverterStats {
    fn increment(&self, name: &str, by: u64) {
        if name == RULE_ERRORS {
            self.rule_errors.fetch_add(by, Ordering::Relaxed);
        }
    }

    fn observe(&self, name: &str, value: f64) {
        if name == ROWS_PER_RECORD {
            self.records.fetch_add(1, Ordering::Relaxed);
            self.rows.fetch_add(value as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stats_ignore_unknown_names() {
        let stats = Arc::new(ConverterStats::default());
        let metrics = Metrics::new(stats.clone());
        metrics.increment(RULE_ERRORS, 2);
        metrics.increment("other", 5);
        metrics.observe(ROWS_PER_RECORD, 3.0);
        metrics.observe(ROWS_PER_RECORD, 0.0);
        assert_eq!((stats.rule_errors(), stats.records(), stats.rows()), (2, 2, 3));
        Metrics::default().increment(RULE_ERRORS, 1);
    }
}
