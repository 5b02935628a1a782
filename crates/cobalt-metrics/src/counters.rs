//! Operation counters for the aggregation pipeline.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use cobalt_core::ReportKey;
use tracing::debug;

/// Receives notable pipeline outcomes.
pub trait OperationLogger: Send + Sync {
    /// A periodic run finished uploading without failures.
    fn log_upload_success(&self);

    /// An envelope could not be encrypted or uploaded.
    fn log_upload_failure(&self);

    fn log_generation_failure(&self, report: &ReportKey);

    /// An event was dropped because its report-day already holds the
    /// maximum number of event vectors.
    fn log_event_vector_buffer_max_exceeded(&self, report: &ReportKey);

    fn log_string_buffer_max_exceeded(&self, report: &ReportKey);
}

/// Discards every outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOperationLogger;

impl OperationLogger for NoopOperationLogger {
    fn log_upload_success(&self) {}
    fn log_upload_failure(&self) {}
    fn log_generation_failure(&self, _report: &ReportKey) {}
    fn log_event_vector_buffer_max_exceeded(&self, _report: &ReportKey) {}
    fn log_string_buffer_max_exceeded(&self, _report: &ReportKey) {}
}

#[derive(Debug, Default, Clone, Copy)]
struct ReportCounts {
    generation_failures: u64,
    event_vector_drops: u64,
    string_drops: u64,
}

/// Per-report counters at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSnapshot {
    pub report: ReportKey,
    pub generation_failures: u64,
    pub event_vector_drops: u64,
    pub string_drops: u64,
}

/// All counters at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub upload_successes: u64,
    pub upload_failures: u64,
    pub generation_failures: u64,
    pub reports: Vec<ReportSnapshot>,
}

/// In-process counters. Totals are lock-free; per-report counts sit
/// behind a mutex.
#[derive(Debug, Default)]
pub struct OperationCounters {
    upload_successes: AtomicU64,
    upload_failures: AtomicU64,
    generation_failures: AtomicU64,
    reports: Mutex<BTreeMap<ReportKey, ReportCounts>>,
}

impl OperationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_successes(&self) -> u64 {
        self.upload_successes.load(Ordering::Relaxed)
    }

    pub fn upload_failures(&self) -> u64 {
        self.upload_failures.load(Ordering::Relaxed)
    }

    pub fn generation_failures(&self) -> u64 {
        self.generation_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        let reports = self
            .reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(report, counts)| ReportSnapshot {
                report: *report,
                generation_failures: counts.generation_failures,
                event_vector_drops: counts.event_vector_drops,
                string_drops: counts.string_drops,
            })
            .collect();

        OperationSnapshot {
            upload_successes: self.upload_successes(),
            upload_failures: self.upload_failures(),
            generation_failures: self.generation_failures(),
            reports,
        }
    }

    fn bump(&self, report: &ReportKey, f: impl FnOnce(&mut ReportCounts)) {
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        f(reports.entry(*report).or_default());
    }
}

impl OperationLogger for OperationCounters {
    fn log_upload_success(&self) {
        self.upload_successes.fetch_add(1, Ordering::Relaxed);
    }

    fn log_upload_failure(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn log_generation_failure(&self, report: &ReportKey) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
        self.bump(report, |c| c.generation_failures += 1);
    }

    fn log_event_vector_buffer_max_exceeded(&self, report: &ReportKey) {
        debug!(%report, "event vector buffer max exceeded");
        self.bump(report, |c| c.event_vector_drops += 1);
    }

    fn log_string_buffer_max_exceeded(&self, report: &ReportKey) {
        debug!(%report, "string buffer max exceeded");
        self.bump(report, |c| c.string_drops += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_count_up() {
        let counters = OperationCounters::new();
        counters.log_upload_success();
        counters.log_upload_failure();
        counters.log_upload_failure();

        assert_eq!(counters.upload_successes(), 1);
        assert_eq!(counters.upload_failures(), 2);
        assert_eq!(counters.generation_failures(), 0);
    }

    #[test]
    fn per_report_counts_are_separate() {
        let counters = OperationCounters::new();
        let a = ReportKey::new(1, 1, 1, 1);
        let b = ReportKey::new(1, 1, 1, 2);
        counters.log_generation_failure(&a);
        counters.log_event_vector_buffer_max_exceeded(&a);
        counters.log_string_buffer_max_exceeded(&b);
        counters.log_string_buffer_max_exceeded(&b);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.generation_failures, 1);
        assert_eq!(
            snapshot.reports,
            vec![
                ReportSnapshot {
                    report: a,
                    generation_failures: 1,
                    event_vector_drops: 1,
                    string_drops: 0,
                },
                ReportSnapshot {
                    report: b,
                    generation_failures: 0,
                    event_vector_drops: 0,
                    string_drops: 2,
                },
            ]
        );
    }

    #[test]
    fn empty_snapshot() {
        assert_eq!(OperationCounters::new().snapshot(), OperationSnapshot::default());
    }
}
