//! The periodic aggregate, generate, and upload job.
//!
//! One run walks through these phases:
//!
//! 1. Gate: a disabled pipeline only records the disabled time.
//! 2. Generate: every eligible report turns its completed days into stored
//!    observations, all reports concurrently.
//! 3. Cleanup: aggregates past the retention watermark and data of reports
//!    that are no longer collected are deleted.
//! 4. Upload: pending observations are encrypted, packed into size-capped
//!    envelopes in arrival order, uploaded, and removed.
//! 5. Finalize: after `upload_done_delay` the uploader is told the run is
//!    over. This happens on every enabled run, even a failed one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cobalt_core::{CobaltClock, Registry, ReleaseStage, ReportKey, SystemClock};
use cobalt_metrics::OperationLogger;
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::crypto::{Encrypter, encrypt_batch};
use crate::data::DataService;
use crate::envelope::{EnvelopeBatcher, PendingEnvelope, build_envelope};
use crate::error::{PipelineError, PipelineResult};
use crate::observations::ObservationGeneratorFactory;
use crate::upload::Uploader;

/// Envelopes are closed before their observations reach this many bytes.
pub const ENVELOPE_MAX_OBSERVATION_BYTES: usize = 100_000;

/// Days an aggregate may still receive events after its own day ends.
pub const LARGEST_AGGREGATION_WINDOW: i32 = 1;

/// Extra days aggregates are kept past the aggregation window.
const RETENTION_SLACK_DAYS: i32 = 2;

#[derive(Debug, Clone)]
pub struct PeriodicJobConfig {
    pub release_stage: ReleaseStage,
    pub api_key: String,
    pub upload_done_delay: Duration,
    /// Reports that are never generated but whose data is still retained.
    pub reports_to_ignore: HashSet<ReportKey>,
    pub enabled: bool,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The pipeline was disabled and did nothing else.
    pub disabled: bool,
    pub generation_failures: usize,
    pub envelopes_uploaded: usize,
    pub observations_sent: usize,
    pub upload_failed: bool,
}

pub struct CobaltPeriodicJob {
    registry: Arc<Registry>,
    data: Arc<dyn DataService>,
    factory: Arc<ObservationGeneratorFactory>,
    encrypter: Arc<dyn Encrypter>,
    uploader: Arc<dyn Uploader>,
    clock: Arc<dyn SystemClock>,
    operation_logger: Arc<dyn OperationLogger>,
    config: PeriodicJobConfig,
}

impl CobaltPeriodicJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        data: Arc<dyn DataService>,
        factory: Arc<ObservationGeneratorFactory>,
        encrypter: Arc<dyn Encrypter>,
        uploader: Arc<dyn Uploader>,
        clock: Arc<dyn SystemClock>,
        operation_logger: Arc<dyn OperationLogger>,
        config: PeriodicJobConfig,
    ) -> Self {
        Self {
            registry,
            data,
            factory,
            encrypter,
            uploader,
            clock,
            operation_logger,
            config,
        }
    }

    /// Run the job once.
    ///
    /// Failures inside a phase are logged and counted, and reported through
    /// the returned [`RunReport`]. A failed cleanup does not stop the upload
    /// phase. Only internal inconsistencies are returned as errors, after
    /// the uploader has been finalized.
    pub async fn generate_aggregated_observations(&self) -> PipelineResult<RunReport> {
        let now = self.clock.now();
        if !self.config.enabled {
            debug!("cobalt disabled, recording disabled time");
            if let Err(e) = self.data.logger_disabled(now).await {
                error!(error = %e, "failed to record disabled time");
            }
            return Ok(RunReport {
                disabled: true,
                ..Default::default()
            });
        }

        let result = self.run_enabled(now).await;

        tokio::time::sleep(self.config.upload_done_delay).await;
        self.uploader.upload_done().await;

        match &result {
            Ok(report) => info!(
                generation_failures = report.generation_failures,
                envelopes = report.envelopes_uploaded,
                observations = report.observations_sent,
                upload_failed = report.upload_failed,
                "periodic run complete"
            ),
            Err(e) => error!(error = %e, "periodic run failed"),
        }
        result
    }

    /// Run the job every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "periodic job started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.generate_aggregated_observations().await {
                        warn!(error = %e, "periodic job run failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("periodic job shutting down");
                    break;
                }
            }
        }
    }

    async fn run_enabled(&self, now: DateTime<Utc>) -> PipelineResult<RunReport> {
        let mut report = RunReport::default();
        let enabled_at = match self.data.logger_enabled(now).await {
            Ok(enabled_at) => enabled_at,
            Err(e) => {
                self.upload_failed(&mut report, "recording enabled time", e);
                return Ok(report);
            }
        };
        let current = CobaltClock::new(now);
        let enabled = CobaltClock::new(enabled_at);

        let relevant = self.eligible_reports();
        report.generation_failures = self.generate(current, enabled).await;

        let watermark = current.day_index_utc() - LARGEST_AGGREGATION_WINDOW - RETENTION_SLACK_DAYS;
        debug!(watermark, reports = relevant.len(), "cleaning up aggregates");
        if let Err(e) = self.data.cleanup(relevant, watermark).await {
            error!(error = %e, watermark, "aggregate cleanup failed");
        }

        self.upload_observations(&mut report).await?;
        if !report.upload_failed {
            self.operation_logger.log_upload_success();
        }
        Ok(report)
    }

    /// Reports collected at this release stage, ignored ones included.
    fn eligible_reports(&self) -> Vec<ReportKey> {
        let stage = self.config.release_stage;
        self.registry
            .metrics()
            .iter()
            .filter(|metric| stage.permits(metric.max_release_stage))
            .flat_map(|metric| {
                metric
                    .reports
                    .iter()
                    .filter(move |report| stage.permits(report.max_release_stage))
                    .map(move |report| self.registry.report_key(metric, report))
            })
            .collect()
    }

    /// Generate observations for every eligible report; returns the number
    /// of reports that failed.
    async fn generate(&self, current: CobaltClock, enabled: CobaltClock) -> usize {
        let stage = self.config.release_stage;
        let mut tasks = Vec::new();
        for metric in self.registry.metrics() {
            if !stage.permits(metric.max_release_stage) {
                continue;
            }
            let day_index_to_generate = current.day_index(metric) - 1;
            let day_index_logger_enabled = enabled.day_index(metric);

            for report in &metric.reports {
                if !stage.permits(report.max_release_stage) {
                    continue;
                }
                let key = self.registry.report_key(metric, report);
                if self.config.reports_to_ignore.contains(&key) {
                    debug!(report = %key, "report ignored, skipping generation");
                    continue;
                }

                let data = self.data.clone();
                let supplier = self.factory.supplier(metric, report);
                let handle = tokio::spawn(async move {
                    data.generate_observations(
                        key,
                        day_index_to_generate,
                        day_index_logger_enabled,
                        supplier,
                    )
                    .await
                });
                tasks.push(async move { (key, handle.await) });
            }
        }

        let total = tasks.len();
        let mut failures = 0;
        for (key, result) in join_all(tasks).await {
            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            failures += 1;
            self.operation_logger.log_generation_failure(&key);
            warn!(report = %key, error = %message, "observation generation failed");
        }
        if failures > 0 {
            error!(failures, total, "failed to generate observations for some reports");
        }
        failures
    }

    async fn upload_observations(&self, report: &mut RunReport) -> PipelineResult<()> {
        let entities = match self.data.oldest_observations_to_send().await {
            Ok(entities) => entities,
            Err(e) => {
                self.upload_failed(report, "reading observations", e);
                return Ok(());
            }
        };
        debug!(pending = entities.len(), "uploading observations");

        let mut batcher = EnvelopeBatcher::new(ENVELOPE_MAX_OBSERVATION_BYTES);
        for entity in entities {
            let batch = match encrypt_batch(&entity, self.encrypter.as_ref()) {
                Ok(batch) => batch,
                Err(e) => {
                    self.upload_failed(report, "encrypting observations", e);
                    return Ok(());
                }
            };
            if let Some(pending) = batcher.push(entity.id, batch) {
                if !self.send(pending, report).await? {
                    return Ok(());
                }
            }
        }
        if let Some(pending) = batcher.finish() {
            self.send(pending, report).await?;
        }
        Ok(())
    }

    /// Upload one envelope and remove its observations. Returns false when
    /// the upload phase should stop.
    async fn send(&self, pending: PendingEnvelope, report: &mut RunReport) -> PipelineResult<bool> {
        let PendingEnvelope { ids, batches } = pending;
        if ids.len() != batches.len() {
            return Err(PipelineError::Internal(format!(
                "envelope has {} batches for {} stored observations",
                batches.len(),
                ids.len()
            )));
        }

        let observations: usize = batches.iter().map(|b| b.encrypted_observation.len()).sum();
        let envelope = build_envelope(batches, &self.config.api_key);
        let message = match self.encrypter.encrypt_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                self.upload_failed(report, "encrypting envelope", e);
                return Ok(false);
            }
        };

        if let Some(message) = message {
            if let Err(e) = self.uploader.upload(message).await {
                self.upload_failed(report, "uploading envelope", e);
                return Ok(false);
            }
            report.envelopes_uploaded += 1;
            report.observations_sent += observations;
        }

        if let Err(e) = self.data.remove_sent_observations(ids).await {
            self.upload_failed(report, "removing sent observations", e);
            return Ok(false);
        }
        Ok(true)
    }

    fn upload_failed(&self, report: &mut RunReport, stage: &str, error: impl fmt::Display) {
        error!(error = %error, stage, "observation upload failed");
        self.operation_logger.log_upload_failure();
        report.upload_failed = true;
    }
}
