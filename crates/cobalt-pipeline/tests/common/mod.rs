//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use rand::rngs::mock::StepRng;

use cobalt_core::registry::MetricDimension;
use cobalt_core::wire::{
    EncryptedMessage, Envelope, Observation, ObservationMetadata, ObservationToEncrypt,
    SystemProfile,
};
use cobalt_core::{
    EventVector, FakeClock, GeneratorSupplier, MetricDefinition, MetricType, PrivacyMechanism,
    Registry, ReleaseStage, ReportDefinition, ReportKey, ReportType, SystemData,
    SystemProfileField,
};
use cobalt_metrics::OperationCounters;
use cobalt_pipeline::crypto::{EncryptionError, Encrypter, PlaintextEncrypter};
use cobalt_pipeline::error::{DataError, DataResult};
use cobalt_pipeline::upload::{UploadError, Uploader};
use cobalt_pipeline::{
    CobaltLogger, CobaltPeriodicJob, DataService, ObservationGeneratorFactory, PeriodicJobConfig,
    SecureRandom, StoreDataService,
};
use cobalt_state::{CobaltStore, ObservationStoreEntity, StateError, StringLimits};

pub const API_KEY: &str = "12345678";
pub const RELEASE_STAGE: ReleaseStage = ReleaseStage::Dogfood;
pub const LOG_TIME_DAY: i32 = 19201;

/// Occurrence metric 1.
pub const REPORT_1: ReportKey = ReportKey::new(1, 1, 1, 1);
/// Occurrence metric 2 carries reports 2, 3 and 4.
pub const REPORT_2: ReportKey = ReportKey::new(1, 1, 2, 2);
/// Keeps only the system version of the device profile.
pub const REPORT_3: ReportKey = ReportKey::new(1, 1, 2, 3);
/// Holds at most two event vectors per day.
pub const REPORT_4: ReportKey = ReportKey::new(1, 1, 2, 4);
/// String metric 5, at most two strings per day.
pub const REPORT_5: ReportKey = ReportKey::new(1, 1, 5, 5);
/// Debug-only report of metric 1.
pub const DEBUG_REPORT: ReportKey = ReportKey::new(1, 1, 1, 7);
/// Shuffled-privacy report of metric 10.
pub const PRIVATE_REPORT: ReportKey = ReportKey::new(1, 1, 10, 10);

pub const INTEGER_METRIC_ID: u32 = 3;
pub const DEBUG_METRIC_ID: u32 = 6;

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn log_time() -> DateTime<Utc> {
    at("2022-07-28T14:15:30Z")
}

pub fn upload_time() -> DateTime<Utc> {
    at("2022-07-29T14:15:30Z")
}

pub fn enabled_time() -> DateTime<Utc> {
    log_time() - chrono::Duration::days(32)
}

pub fn device_profile() -> SystemProfile {
    SystemProfile {
        os: "linux".into(),
        arch: "arm64".into(),
        system_version: "1.2.3".into(),
        app_version: "0.1.2".into(),
        ..Default::default()
    }
}

pub fn profile_1() -> SystemProfile {
    SystemProfile {
        system_version: "1.2.3".into(),
        ..Default::default()
    }
}

pub fn profile_2() -> SystemProfile {
    SystemProfile {
        system_version: "2.4.8".into(),
        ..Default::default()
    }
}

pub fn ev(codes: &[u32]) -> EventVector {
    EventVector::new(codes.to_vec())
}

pub fn registry() -> Registry {
    let mut debug_report = ReportDefinition::new(7, ReportType::FleetwideOccurrenceCounts);
    debug_report.max_release_stage = Some(ReleaseStage::Debug);
    let mut metric_1 = MetricDefinition::new(1, MetricType::Occurrence);
    metric_1.reports = vec![
        ReportDefinition::new(1, ReportType::FleetwideOccurrenceCounts),
        debug_report,
    ];

    let mut report_3 = ReportDefinition::new(3, ReportType::FleetwideOccurrenceCounts);
    report_3.system_profile_fields = vec![SystemProfileField::SystemVersion];
    let mut report_4 = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
    report_4.event_vector_buffer_max = 2;
    let mut metric_2 = MetricDefinition::new(2, MetricType::Occurrence);
    metric_2.reports = vec![
        ReportDefinition::new(2, ReportType::FleetwideOccurrenceCounts),
        report_3,
        report_4,
    ];

    let integer_metric = MetricDefinition::new(INTEGER_METRIC_ID, MetricType::Integer);

    let mut string_report = ReportDefinition::new(5, ReportType::StringCounts);
    string_report.string_buffer_max = 2;
    let mut string_metric = MetricDefinition::new(5, MetricType::String);
    string_metric.reports = vec![string_report];

    let mut debug_metric = MetricDefinition::new(DEBUG_METRIC_ID, MetricType::Occurrence);
    debug_metric.max_release_stage = Some(ReleaseStage::Debug);
    debug_metric.reports = vec![ReportDefinition::new(6, ReportType::FleetwideOccurrenceCounts)];

    Registry::new(
        1,
        1,
        vec![metric_1, metric_2, integer_metric, string_metric, debug_metric],
    )
    .unwrap()
}

/// A registry holding only a shuffled-privacy report over four event codes.
pub fn private_registry() -> Registry {
    let mut report = ReportDefinition::new(10, ReportType::FleetwideOccurrenceCounts);
    report.privacy_mechanism = PrivacyMechanism::ShuffledDifferentialPrivacy;
    report.min_value = 1;
    report.max_value = 10;
    report.num_index_points = 10;
    report.poisson_mean = 0.01;

    let mut metric = MetricDefinition::new(10, MetricType::Occurrence);
    metric.dimensions = vec![MetricDimension {
        dimension: "status".into(),
        max_event_code: 3,
        event_codes: Vec::new(),
    }];
    metric.reports = vec![report];
    Registry::new(1, 1, vec![metric]).unwrap()
}

/// Decode the plaintext observations of an envelope, batch by batch.
pub fn observations_in(envelope: &Envelope) -> Vec<(ObservationMetadata, Vec<ObservationToEncrypt>)> {
    envelope
        .batch
        .iter()
        .map(|batch| {
            let observations = batch
                .encrypted_observation
                .iter()
                .map(|message| ObservationToEncrypt {
                    observation: Some(Observation::decode(message.ciphertext.as_slice()).unwrap()),
                    contribution_id: message.contribution_id.clone(),
                })
                .collect();
            (batch.meta_data.clone().unwrap(), observations)
        })
        .collect()
}

pub fn metadata(report: ReportKey, day_index: i32, profile: SystemProfile) -> ObservationMetadata {
    ObservationMetadata {
        customer_id: report.customer_id,
        project_id: report.project_id,
        metric_id: report.metric_id,
        report_id: report.report_id,
        day_index: day_index as u32,
        system_profile: Some(profile),
    }
}

// ── Fakes ──────────────────────────────────────────────────────────

/// Keeps every uploaded envelope, decoded from plaintext.
#[derive(Default)]
pub struct RecordingUploader {
    envelopes: Mutex<Vec<Envelope>>,
    done: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingUploader {
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }

    pub fn upload_done_count(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, message: EncryptedMessage) -> Result<(), UploadError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Failed("backend unavailable".into()));
        }
        let envelope = Envelope::decode(message.ciphertext.as_slice())
            .map_err(|e| UploadError::Failed(e.to_string()))?;
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn upload_done(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

/// Plaintext encryption that can be told to fail.
#[derive(Default)]
pub struct ThrowingEncrypter {
    throw_on_envelope: AtomicBool,
    throw_on_observation: AtomicBool,
}

impl ThrowingEncrypter {
    pub fn throw_on_envelope(&self) {
        self.throw_on_envelope.store(true, Ordering::SeqCst);
    }

    pub fn throw_on_observation(&self) {
        self.throw_on_observation.store(true, Ordering::SeqCst);
    }
}

impl Encrypter for ThrowingEncrypter {
    fn encrypt_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<EncryptedMessage>, EncryptionError> {
        if self.throw_on_envelope.load(Ordering::SeqCst) {
            return Err(EncryptionError::Failed("envelope key missing".into()));
        }
        PlaintextEncrypter.encrypt_envelope(envelope)
    }

    fn encrypt_observation(
        &self,
        observation: &ObservationToEncrypt,
    ) -> Result<Option<EncryptedMessage>, EncryptionError> {
        if self.throw_on_observation.load(Ordering::SeqCst) {
            return Err(EncryptionError::Failed("observation key missing".into()));
        }
        PlaintextEncrypter.encrypt_observation(observation)
    }
}

/// Delegates to a real data service but fails chosen operations.
pub struct FailingDataService {
    pub inner: Arc<StoreDataService>,
    pub fail_generation_for: HashSet<ReportKey>,
    pub fail_aggregate_for: HashSet<ReportKey>,
    pub fail_enabled: bool,
    pub fail_cleanup: bool,
    aggregate_calls: Mutex<Vec<ReportKey>>,
}

impl FailingDataService {
    pub fn new(inner: Arc<StoreDataService>) -> Self {
        Self {
            inner,
            fail_generation_for: HashSet::new(),
            fail_aggregate_for: HashSet::new(),
            fail_enabled: false,
            fail_cleanup: false,
            aggregate_calls: Mutex::new(Vec::new()),
        }
    }

    /// Reports passed to `aggregate_count`, in call order.
    pub fn aggregate_calls(&self) -> Vec<ReportKey> {
        self.aggregate_calls.lock().unwrap().clone()
    }
}

fn injected(what: &str) -> DataError {
    DataError::State(StateError::Write(format!("injected failure: {what}")))
}

#[async_trait]
impl DataService for FailingDataService {
    async fn logger_enabled(&self, now: DateTime<Utc>) -> DataResult<DateTime<Utc>> {
        if self.fail_enabled {
            return Err(injected("logger enabled"));
        }
        self.inner.logger_enabled(now).await
    }

    async fn logger_disabled(&self, now: DateTime<Utc>) -> DataResult<()> {
        self.inner.logger_disabled(now).await
    }

    async fn aggregate_count(
        &self,
        report: ReportKey,
        day_index: i32,
        system_profile: SystemProfile,
        event_vector: EventVector,
        event_vector_buffer_max: u64,
        count: i64,
    ) -> DataResult<()> {
        self.aggregate_calls.lock().unwrap().push(report);
        if self.fail_aggregate_for.contains(&report) {
            return Err(injected("aggregate"));
        }
        self.inner
            .aggregate_count(report, day_index, system_profile, event_vector, event_vector_buffer_max, count)
            .await
    }

    async fn aggregate_string(
        &self,
        report: ReportKey,
        day_index: i32,
        system_profile: SystemProfile,
        event_vector: EventVector,
        limits: StringLimits,
        value: String,
    ) -> DataResult<()> {
        self.inner
            .aggregate_string(report, day_index, system_profile, event_vector, limits, value)
            .await
    }

    async fn generate_observations(
        &self,
        report: ReportKey,
        day_index_to_generate: i32,
        day_index_logger_enabled: i32,
        supplier: GeneratorSupplier,
    ) -> DataResult<()> {
        if self.fail_generation_for.contains(&report) {
            return Err(DataError::State(StateError::Generate(format!(
                "injected failure for {report}"
            ))));
        }
        self.inner
            .generate_observations(report, day_index_to_generate, day_index_logger_enabled, supplier)
            .await
    }

    async fn cleanup(&self, relevant: Vec<ReportKey>, day_index_watermark: i32) -> DataResult<()> {
        if self.fail_cleanup {
            return Err(injected("cleanup"));
        }
        self.inner.cleanup(relevant, day_index_watermark).await
    }

    async fn oldest_observations_to_send(&self) -> DataResult<Vec<ObservationStoreEntity>> {
        self.inner.oldest_observations_to_send().await
    }

    async fn remove_sent_observations(&self, ids: Vec<u64>) -> DataResult<()> {
        self.inner.remove_sent_observations(ids).await
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub struct Harness {
    pub store: CobaltStore,
    pub data: Arc<StoreDataService>,
    pub counters: Arc<OperationCounters>,
    pub clock: Arc<FakeClock>,
    pub uploader: Arc<RecordingUploader>,
    pub encrypter: Arc<ThrowingEncrypter>,
    pub registry: Arc<Registry>,
    pub factory: Arc<ObservationGeneratorFactory>,
}

impl Harness {
    pub fn new(registry: Registry) -> Self {
        let store = CobaltStore::open_in_memory().unwrap();
        let counters = Arc::new(OperationCounters::new());
        let data = Arc::new(StoreDataService::new(store.clone(), counters.clone()));
        let random = SecureRandom::with_rng(StepRng::new(0x0101_0101_0101_0101, 0));
        let factory = Arc::new(ObservationGeneratorFactory::new(
            registry.customer_id(),
            registry.project_id(),
            SystemData::new(device_profile()),
            Arc::new(random),
        ));

        Self {
            store,
            data,
            counters,
            clock: Arc::new(FakeClock::new(log_time())),
            uploader: Arc::new(RecordingUploader::default()),
            encrypter: Arc::new(ThrowingEncrypter::default()),
            registry: Arc::new(registry),
            factory,
        }
    }

    /// Enabled since long ago, with reports 1 to 4 sent up to the day
    /// before `LOG_TIME_DAY`.
    pub fn with_sent_reports(registry: Registry) -> Self {
        let harness = Self::new(registry);
        harness.store.logger_enabled(enabled_time()).unwrap();
        for report in [REPORT_1, REPORT_2, REPORT_3, REPORT_4] {
            harness
                .store
                .insert_last_sent_day_index(&report, LOG_TIME_DAY - 1)
                .unwrap();
        }
        harness
    }

    pub fn config(&self) -> PeriodicJobConfig {
        PeriodicJobConfig {
            release_stage: RELEASE_STAGE,
            api_key: API_KEY.to_string(),
            upload_done_delay: Duration::ZERO,
            reports_to_ignore: HashSet::new(),
            enabled: true,
        }
    }

    pub fn job(&self) -> CobaltPeriodicJob {
        self.job_with(self.config(), self.data.clone())
    }

    pub fn job_with(&self, config: PeriodicJobConfig, data: Arc<dyn DataService>) -> CobaltPeriodicJob {
        CobaltPeriodicJob::new(
            self.registry.clone(),
            data,
            self.factory.clone(),
            self.encrypter.clone(),
            self.uploader.clone(),
            self.clock.clone(),
            self.counters.clone(),
            config,
        )
    }

    pub fn logger(&self, enabled: bool) -> CobaltLogger {
        self.logger_with(enabled, self.data.clone())
    }

    pub fn logger_with(&self, enabled: bool, data: Arc<dyn DataService>) -> CobaltLogger {
        CobaltLogger::new(
            self.registry.clone(),
            data,
            self.clock.clone(),
            SystemData::new(device_profile()),
            RELEASE_STAGE,
            enabled,
        )
    }

    pub async fn aggregate(&self, report: ReportKey, day: i32, profile: SystemProfile, codes: &[u32], count: i64) {
        self.data
            .aggregate_count(report, day, profile, ev(codes), 0, count)
            .await
            .unwrap();
    }

    pub fn pending_observations(&self) -> usize {
        self.store.oldest_observations().unwrap().len()
    }
}
