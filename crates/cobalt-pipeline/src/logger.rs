//! The public ingestion API.

use std::sync::Arc;

use cobalt_core::{
    CobaltClock, EventVector, MetricDefinition, MetricType, Registry, ReleaseStage, ReportType,
    SystemClock, SystemData,
};
use cobalt_state::StringLimits;
use futures_util::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::data::DataService;
use crate::error::{DataError, DataResult, LoggerError, LoggerResult};

/// Validates events against the registry and writes per-day aggregates.
pub struct CobaltLogger {
    registry: Arc<Registry>,
    data: Arc<dyn DataService>,
    clock: Arc<dyn SystemClock>,
    system: SystemData,
    release_stage: ReleaseStage,
    enabled: bool,
}

impl CobaltLogger {
    pub fn new(
        registry: Arc<Registry>,
        data: Arc<dyn DataService>,
        clock: Arc<dyn SystemClock>,
        system: SystemData,
        release_stage: ReleaseStage,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            data,
            clock,
            system,
            release_stage,
            enabled,
        }
    }

    /// Log `count` occurrences of an event of an OCCURRENCE metric.
    ///
    /// Every eligible fleetwide-occurrence report of the metric is written
    /// concurrently. The call fails with the first failed write; writes
    /// already in flight still complete.
    pub async fn log_occurrence(
        &self,
        metric_id: u32,
        count: i64,
        event_codes: &[i32],
    ) -> LoggerResult<()> {
        if !self.enabled {
            return self.record_disabled().await;
        }
        if count < 0 {
            return Err(LoggerError::InvalidArgument(format!(
                "count must be non-negative, got {count}"
            )));
        }
        let Some((metric, event_vector)) =
            self.resolve(metric_id, MetricType::Occurrence, event_codes)?
        else {
            return Ok(());
        };

        let day_index = CobaltClock::new(self.clock.now()).day_index(metric);
        let mut writes = Vec::new();
        for report in &metric.reports {
            if !self.release_stage.permits(report.max_release_stage) {
                continue;
            }
            if report.report_type != ReportType::FleetwideOccurrenceCounts {
                continue;
            }

            let data = self.data.clone();
            let report_key = self.registry.report_key(metric, report);
            let profile = self.system.filtered_profile(&report.system_profile_fields);
            let event_vector = event_vector.clone();
            let buffer_max = report.event_vector_buffer_max;
            writes.push(tokio::spawn(async move {
                data.aggregate_count(report_key, day_index, profile, event_vector, buffer_max, count)
                    .await
            }));
        }

        debug!(metric_id, day_index, writes = writes.len(), "logging occurrence");
        join_writes(writes).await
    }

    /// Log one occurrence of `value` for a STRING metric.
    pub async fn log_string(
        &self,
        metric_id: u32,
        value: &str,
        event_codes: &[i32],
    ) -> LoggerResult<()> {
        if !self.enabled {
            return self.record_disabled().await;
        }
        let Some((metric, event_vector)) =
            self.resolve(metric_id, MetricType::String, event_codes)?
        else {
            return Ok(());
        };

        let day_index = CobaltClock::new(self.clock.now()).day_index(metric);
        let mut writes = Vec::new();
        for report in &metric.reports {
            if !self.release_stage.permits(report.max_release_stage) {
                continue;
            }
            if report.report_type != ReportType::StringCounts {
                continue;
            }

            let data = self.data.clone();
            let report_key = self.registry.report_key(metric, report);
            let profile = self.system.filtered_profile(&report.system_profile_fields);
            let event_vector = event_vector.clone();
            let limits = StringLimits {
                event_vector_buffer_max: report.event_vector_buffer_max,
                string_buffer_max: report.string_buffer_max,
            };
            let value = value.to_string();
            writes.push(tokio::spawn(async move {
                data.aggregate_string(report_key, day_index, profile, event_vector, limits, value)
                    .await
            }));
        }

        debug!(metric_id, day_index, writes = writes.len(), "logging string");
        join_writes(writes).await
    }

    async fn record_disabled(&self) -> LoggerResult<()> {
        self.data.logger_disabled(self.clock.now()).await?;
        Ok(())
    }

    /// Look up and type-check a metric and build its event vector.
    ///
    /// `None` means the metric is gated off for this release stage.
    fn resolve(
        &self,
        metric_id: u32,
        expected: MetricType,
        event_codes: &[i32],
    ) -> LoggerResult<Option<(&MetricDefinition, EventVector)>> {
        let codes = event_codes
            .iter()
            .map(|&code| {
                u32::try_from(code).map_err(|_| {
                    LoggerError::InvalidArgument(format!(
                        "event codes must be non-negative, got {code}"
                    ))
                })
            })
            .collect::<LoggerResult<Vec<u32>>>()?;

        let metric = self
            .registry
            .metric(metric_id)
            .ok_or(LoggerError::UnknownMetric(metric_id))?;
        if metric.metric_type != expected {
            return Err(LoggerError::WrongMetricType {
                metric_id,
                expected,
                found: metric.metric_type,
            });
        }

        if !self.release_stage.permits(metric.max_release_stage) {
            debug!(metric_id, stage = ?self.release_stage, "metric not collected in this release stage");
            return Ok(None);
        }
        Ok(Some((metric, EventVector::new(codes))))
    }
}

async fn join_writes(writes: Vec<JoinHandle<DataResult<()>>>) -> LoggerResult<()> {
    try_join_all(writes.into_iter().map(|handle| async move {
        handle.await.map_err(|e| DataError::Task(e.to_string()))?
    }))
    .await?;
    Ok(())
}
