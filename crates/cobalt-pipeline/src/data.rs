//! The async storage boundary used by the logger and the periodic job.
//!
//! `StoreDataService` adapts the synchronous redb store by running every
//! call on tokio's blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cobalt_core::wire::SystemProfile;
use cobalt_core::{EventVector, GeneratorSupplier, ReportKey};
use cobalt_metrics::OperationLogger;
use cobalt_state::{AggregateOutcome, CobaltStore, ObservationStoreEntity, StateResult, StringLimits};
use tracing::warn;

use crate::error::{DataError, DataResult};

#[async_trait]
pub trait DataService: Send + Sync {
    /// Mark the logger enabled; returns the time it was initially enabled.
    async fn logger_enabled(&self, now: DateTime<Utc>) -> DataResult<DateTime<Utc>>;

    /// Mark the logger disabled as of `now` (the first call wins).
    async fn logger_disabled(&self, now: DateTime<Utc>) -> DataResult<()>;

    /// Atomically add `count` to an occurrence aggregate.
    async fn aggregate_count(
        &self,
        report: ReportKey,
        day_index: i32,
        system_profile: SystemProfile,
        event_vector: EventVector,
        event_vector_buffer_max: u64,
        count: i64,
    ) -> DataResult<()>;

    /// Atomically count one occurrence of a string.
    async fn aggregate_string(
        &self,
        report: ReportKey,
        day_index: i32,
        system_profile: SystemProfile,
        event_vector: EventVector,
        limits: StringLimits,
        value: String,
    ) -> DataResult<()>;

    async fn generate_observations(
        &self,
        report: ReportKey,
        day_index_to_generate: i32,
        day_index_logger_enabled: i32,
        supplier: GeneratorSupplier,
    ) -> DataResult<()>;

    /// Delete aggregates at or before the watermark and data of reports
    /// outside `relevant`.
    async fn cleanup(&self, relevant: Vec<ReportKey>, day_index_watermark: i32) -> DataResult<()>;

    /// Pending observations, oldest first.
    async fn oldest_observations_to_send(&self) -> DataResult<Vec<ObservationStoreEntity>>;

    async fn remove_sent_observations(&self, ids: Vec<u64>) -> DataResult<()>;
}

/// `DataService` backed by a `CobaltStore`.
#[derive(Clone)]
pub struct StoreDataService {
    store: CobaltStore,
    operation_logger: Arc<dyn OperationLogger>,
}

impl StoreDataService {
    pub fn new(store: CobaltStore, operation_logger: Arc<dyn OperationLogger>) -> Self {
        Self {
            store,
            operation_logger,
        }
    }

    pub fn store(&self) -> &CobaltStore {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> DataResult<T>
    where
        F: FnOnce(CobaltStore) -> StateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| DataError::Task(e.to_string()))?
            .map_err(DataError::from)
    }

    fn record_outcome(&self, report: &ReportKey, day_index: i32, outcome: AggregateOutcome) {
        match outcome {
            AggregateOutcome::Stored => {}
            AggregateOutcome::EventVectorBufferFull => {
                warn!(%report, day_index, "event vector buffer max reached, dropping event");
                self.operation_logger
                    .log_event_vector_buffer_max_exceeded(report);
            }
            AggregateOutcome::StringBufferFull => {
                warn!(%report, day_index, "string buffer max reached, dropping string");
                self.operation_logger.log_string_buffer_max_exceeded(report);
            }
        }
    }
}

#[async_trait]
impl DataService for StoreDataService {
    async fn logger_enabled(&self, now: DateTime<Utc>) -> DataResult<DateTime<Utc>> {
        self.blocking(move |store| store.logger_enabled(now)).await
    }

    async fn logger_disabled(&self, now: DateTime<Utc>) -> DataResult<()> {
        self.blocking(move |store| store.logger_disabled(now)).await
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
        let outcome = self
            .blocking(move |store| {
                store.aggregate_count(
                    &report,
                    day_index,
                    &system_profile,
                    &event_vector,
                    event_vector_buffer_max,
                    count,
                )
            })
            .await?;
        self.record_outcome(&report, day_index, outcome);
        Ok(())
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
        let outcome = self
            .blocking(move |store| {
                store.aggregate_string(
                    &report,
                    day_index,
                    &system_profile,
                    &event_vector,
                    limits,
                    &value,
                )
            })
            .await?;
        self.record_outcome(&report, day_index, outcome);
        Ok(())
    }

    async fn generate_observations(
        &self,
        report: ReportKey,
        day_index_to_generate: i32,
        day_index_logger_enabled: i32,
        supplier: GeneratorSupplier,
    ) -> DataResult<()> {
        self.blocking(move |store| {
            store.generate_observations(
                &report,
                day_index_to_generate,
                day_index_logger_enabled,
                &*supplier,
            )
        })
        .await?;
        Ok(())
    }

    async fn cleanup(&self, relevant: Vec<ReportKey>, day_index_watermark: i32) -> DataResult<()> {
        self.blocking(move |store| store.cleanup(&relevant, day_index_watermark))
            .await?;
        Ok(())
    }

    async fn oldest_observations_to_send(&self) -> DataResult<Vec<ObservationStoreEntity>> {
        self.blocking(|store| store.oldest_observations()).await
    }

    async fn remove_sent_observations(&self, ids: Vec<u64>) -> DataResult<()> {
        self.blocking(move |store| store.remove_observations(&ids))
            .await?;
        Ok(())
    }
}
