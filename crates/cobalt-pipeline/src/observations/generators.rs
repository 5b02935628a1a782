//! Observation generators, one per report strategy.

use std::sync::Arc;

use cobalt_core::wire::{
    IndexHistogram, IntegerObservation, IntegerValue, Observation, ObservationMetadata,
    ObservationToEncrypt, ObservationType, PrivateIndexObservation,
    ReportParticipationObservation, StringHistogramObservation, SystemProfile,
    UnencryptedObservationBatch,
};
use cobalt_core::registry::num_private_indices;
use cobalt_core::{
    AggregateValue, DayAggregates, GenerateError, MetricDefinition, ObservationGenerator,
    ReportDefinition, ReportKey,
};

use super::private_index::private_index;
use super::privacy::SecureRandom;

/// State shared by every generator: where the batch belongs and how to
/// mint ids.
#[derive(Clone)]
pub(crate) struct BatchContext {
    pub report: ReportKey,
    pub day_index: i32,
    pub random: Arc<SecureRandom>,
}

impl BatchContext {
    fn metadata(&self, system_profile: &SystemProfile) -> Result<ObservationMetadata, GenerateError> {
        let day_index =
            u32::try_from(self.day_index).map_err(|_| GenerateError::InvalidDay(self.day_index))?;
        Ok(ObservationMetadata {
            customer_id: self.report.customer_id,
            project_id: self.report.project_id,
            metric_id: self.report.metric_id,
            report_id: self.report.report_id,
            day_index,
            system_profile: Some(system_profile.clone()),
        })
    }

    fn observation(&self, observation_type: ObservationType) -> ObservationToEncrypt {
        ObservationToEncrypt {
            observation: Some(Observation {
                random_id: self.random.random_id(),
                observation_type: Some(observation_type),
            }),
            contribution_id: self.random.random_id(),
        }
    }

    fn batch(
        &self,
        system_profile: &SystemProfile,
        observations: Vec<ObservationToEncrypt>,
    ) -> Result<UnencryptedObservationBatch, GenerateError> {
        Ok(UnencryptedObservationBatch {
            metadata: Some(self.metadata(system_profile)?),
            unencrypted_observations: observations,
        })
    }

    fn wrong_value(&self) -> GenerateError {
        GenerateError::WrongValueType(self.report.to_string())
    }
}

/// Fleetwide occurrence counts without added noise: one integer
/// observation per system profile.
pub(crate) struct IntegerGenerator {
    pub context: BatchContext,
}

impl ObservationGenerator for IntegerGenerator {
    fn generate_observations(
        &self,
        day: &DayAggregates,
    ) -> Result<Vec<UnencryptedObservationBatch>, GenerateError> {
        let mut batches = Vec::new();
        for profile in day.profiles.iter().filter(|p| !p.records.is_empty()) {
            let values = profile
                .records
                .iter()
                .map(|record| match record.aggregate_value {
                    AggregateValue::Integer(value) => Ok(IntegerValue {
                        event_codes: record.event_vector.codes().to_vec(),
                        value,
                    }),
                    AggregateValue::IndexHistogram(_) => Err(self.context.wrong_value()),
                })
                .collect::<Result<Vec<_>, _>>()?;

            let observation = self
                .context
                .observation(ObservationType::Integer(IntegerObservation { values }));
            batches.push(self.context.batch(&profile.system_profile, vec![observation])?);
        }
        Ok(batches)
    }
}

/// Fleetwide occurrence counts under shuffled differential privacy.
///
/// Each (event vector, count) becomes a private index observation; every
/// index of the private space additionally receives Poisson noise. A
/// participation observation is always added, so a batch is produced even
/// for days without data.
pub(crate) struct PrivateIndexGenerator {
    pub context: BatchContext,
    pub metric: MetricDefinition,
    pub report: ReportDefinition,
    /// Profile used for days without data.
    pub default_profile: SystemProfile,
}

impl PrivateIndexGenerator {
    fn noise(&self, indices: &mut Vec<u64>) {
        let space = num_private_indices(&self.metric, &self.report).unwrap_or(0);
        if space == 0 {
            return;
        }
        let random = &self.context.random;
        let fabricated = random.poisson(self.report.poisson_mean * space as f64);
        for _ in 0..fabricated {
            indices.push(random.index_below(space));
        }
    }
}

impl ObservationGenerator for PrivateIndexGenerator {
    fn generate_observations(
        &self,
        day: &DayAggregates,
    ) -> Result<Vec<UnencryptedObservationBatch>, GenerateError> {
        let random = &self.context.random;
        let mut per_profile: Vec<(&SystemProfile, Vec<u64>)> = Vec::new();
        for profile in day.profiles.iter().filter(|p| !p.records.is_empty()) {
            let mut indices = Vec::with_capacity(profile.records.len());
            for record in &profile.records {
                let value = record
                    .aggregate_value
                    .as_integer()
                    .ok_or_else(|| self.context.wrong_value())?;
                indices.push(private_index(
                    &self.metric,
                    &self.report,
                    record.event_vector.codes(),
                    value,
                    random,
                )?);
            }
            per_profile.push((&profile.system_profile, indices));
        }
        if per_profile.is_empty() {
            per_profile.push((&self.default_profile, Vec::new()));
        }

        let mut batches = Vec::with_capacity(per_profile.len());
        for (profile, mut indices) in per_profile {
            self.noise(&mut indices);
            indices.sort_unstable();

            let mut observations: Vec<ObservationToEncrypt> = indices
                .into_iter()
                .map(|index| {
                    self.context
                        .observation(ObservationType::PrivateIndex(PrivateIndexObservation { index }))
                })
                .collect();
            observations.push(self.context.observation(ObservationType::ReportParticipation(
                ReportParticipationObservation {},
            )));
            batches.push(self.context.batch(profile, observations)?);
        }
        Ok(batches)
    }
}

/// String counts: one string histogram observation per system profile.
pub(crate) struct StringHistogramGenerator {
    pub context: BatchContext,
}

impl ObservationGenerator for StringHistogramGenerator {
    fn generate_observations(
        &self,
        day: &DayAggregates,
    ) -> Result<Vec<UnencryptedObservationBatch>, GenerateError> {
        let mut batches = Vec::new();
        for profile in day.profiles.iter().filter(|p| !p.records.is_empty()) {
            let histograms = profile
                .records
                .iter()
                .map(|record| match &record.aggregate_value {
                    AggregateValue::IndexHistogram(counts) => Ok(IndexHistogram {
                        event_codes: record.event_vector.codes().to_vec(),
                        bucket_indices: counts.keys().copied().collect(),
                        bucket_counts: counts.values().copied().collect(),
                    }),
                    AggregateValue::Integer(_) => Err(self.context.wrong_value()),
                })
                .collect::<Result<Vec<_>, _>>()?;

            let observation = self.context.observation(ObservationType::StringHistogram(
                StringHistogramObservation {
                    string_histograms: histograms,
                    string_hashes: day.string_hashes.clone(),
                },
            ));
            batches.push(self.context.batch(&profile.system_profile, vec![observation])?);
        }
        Ok(batches)
    }
}

/// Stands in for report kinds this client cannot produce.
pub(crate) struct UnsupportedGenerator {
    pub report: ReportKey,
}

impl ObservationGenerator for UnsupportedGenerator {
    fn generate_observations(
        &self,
        _day: &DayAggregates,
    ) -> Result<Vec<UnencryptedObservationBatch>, GenerateError> {
        Err(GenerateError::Other(format!(
            "report {} has no observation generator",
            self.report
        )))
    }
}
