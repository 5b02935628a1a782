//! Chooses the observation generator for a report.

use std::sync::Arc;

use cobalt_core::{
    GeneratorSupplier, MetricDefinition, ObservationGenerator, PrivacyMechanism, ReportDefinition,
    ReportKey, ReportType, SystemData,
};

use super::generators::{
    BatchContext, IntegerGenerator, PrivateIndexGenerator, StringHistogramGenerator,
    UnsupportedGenerator,
};
use super::privacy::SecureRandom;

pub struct ObservationGeneratorFactory {
    customer_id: u32,
    project_id: u32,
    system: SystemData,
    random: Arc<SecureRandom>,
}

impl ObservationGeneratorFactory {
    pub fn new(
        customer_id: u32,
        project_id: u32,
        system: SystemData,
        random: Arc<SecureRandom>,
    ) -> Self {
        Self {
            customer_id,
            project_id,
            system,
            random,
        }
    }

    /// The generator for one report on one day.
    pub fn get_generator(
        &self,
        metric: &MetricDefinition,
        report: &ReportDefinition,
        day_index: i32,
    ) -> Box<dyn ObservationGenerator> {
        let key = ReportKey::new(self.customer_id, self.project_id, metric.id, report.id);
        let context = BatchContext {
            report: key,
            day_index,
            random: self.random.clone(),
        };

        match (report.report_type, report.privacy_mechanism) {
            (ReportType::FleetwideOccurrenceCounts, PrivacyMechanism::DeIdentification) => {
                Box::new(IntegerGenerator { context })
            }
            (
                ReportType::FleetwideOccurrenceCounts,
                PrivacyMechanism::ShuffledDifferentialPrivacy,
            ) => Box::new(PrivateIndexGenerator {
                context,
                metric: metric.clone(),
                report: report.clone(),
                default_profile: self.system.filtered_profile(&report.system_profile_fields),
            }),
            (ReportType::StringCounts, PrivacyMechanism::DeIdentification) => {
                Box::new(StringHistogramGenerator { context })
            }
            _ => Box::new(UnsupportedGenerator { report: key }),
        }
    }

    /// A supplier that builds this report's generator for any day.
    pub fn supplier(
        self: &Arc<Self>,
        metric: &MetricDefinition,
        report: &ReportDefinition,
    ) -> GeneratorSupplier {
        let factory = Arc::clone(self);
        let metric = metric.clone();
        let report = report.clone();
        Arc::new(move |day_index| factory.get_generator(&metric, &report, day_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cobalt_core::registry::MetricDimension;
    use cobalt_core::wire::{ObservationType, SystemProfile};
    use cobalt_core::{
        AggregateValue, DayAggregates, EventRecord, EventVector, GenerateError, MetricType,
        ProfileAggregates, SystemProfileField,
    };
    use rand::rngs::mock::StepRng;

    const DAY: i32 = 19201;

    fn factory() -> ObservationGeneratorFactory {
        let system = SystemData::new(SystemProfile {
            os: "linux".into(),
            arch: "arm64".into(),
            ..Default::default()
        });
        let random = SecureRandom::with_rng(StepRng::new(0x0101_0101_0101_0101, 0));
        ObservationGeneratorFactory::new(1, 2, system, Arc::new(random))
    }

    fn day(records: Vec<(Vec<u32>, AggregateValue)>) -> DayAggregates {
        DayAggregates {
            day_index: DAY,
            profiles: vec![ProfileAggregates {
                system_profile: SystemProfile {
                    os: "linux".into(),
                    ..Default::default()
                },
                records: records
                    .into_iter()
                    .map(|(codes, value)| EventRecord {
                        event_vector: EventVector::new(codes),
                        aggregate_value: value,
                    })
                    .collect(),
            }],
            string_hashes: Vec::new(),
        }
    }

    fn observation_types(
        batch: &cobalt_core::wire::UnencryptedObservationBatch,
    ) -> Vec<ObservationType> {
        batch
            .unencrypted_observations
            .iter()
            .map(|o| {
                o.observation
                    .as_ref()
                    .unwrap()
                    .observation_type
                    .clone()
                    .unwrap()
            })
            .collect()
    }

    fn occurrence_metric() -> MetricDefinition {
        let mut metric = MetricDefinition::new(3, MetricType::Occurrence);
        metric.dimensions = vec![MetricDimension {
            max_event_code: 1,
            ..Default::default()
        }];
        metric
    }

    fn private_report() -> ReportDefinition {
        let mut report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        report.privacy_mechanism = PrivacyMechanism::ShuffledDifferentialPrivacy;
        report.min_value = 1;
        report.max_value = 4;
        report.num_index_points = 4;
        report.poisson_mean = 0.5;
        report.system_profile_fields = vec![SystemProfileField::Arch];
        report
    }

    #[test]
    fn integer_report_emits_one_observation_per_profile() {
        let metric = occurrence_metric();
        let report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        let generator = factory().get_generator(&metric, &report, DAY);

        let batches = generator
            .generate_observations(&day(vec![
                (vec![0], AggregateValue::Integer(150)),
                (vec![1], AggregateValue::Integer(3)),
            ]))
            .unwrap();
        assert_eq!(batches.len(), 1);

        let metadata = batches[0].metadata.as_ref().unwrap();
        assert_eq!(
            (metadata.customer_id, metadata.project_id, metadata.metric_id, metadata.report_id),
            (1, 2, 3, 4)
        );
        assert_eq!(metadata.day_index, DAY as u32);
        assert_eq!(metadata.system_profile.as_ref().unwrap().os, "linux");

        let ObservationType::Integer(integer) = &observation_types(&batches[0])[0] else {
            panic!("expected an integer observation");
        };
        assert_eq!(integer.values.len(), 2);
        assert_eq!(integer.values[0].event_codes, vec![0]);
        assert_eq!(integer.values[0].value, 150);

        let observation = &batches[0].unencrypted_observations[0];
        assert_eq!(observation.contribution_id, vec![1u8; 8]);
        assert_eq!(observation.observation.as_ref().unwrap().random_id, vec![1u8; 8]);
    }

    #[test]
    fn integer_report_without_data_emits_nothing() {
        let metric = occurrence_metric();
        let report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        let generator = factory().get_generator(&metric, &report, DAY);
        assert!(generator.generate_observations(&DayAggregates::empty(DAY)).unwrap().is_empty());
    }

    #[test]
    fn integer_report_rejects_histograms() {
        let metric = occurrence_metric();
        let report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        let generator = factory().get_generator(&metric, &report, DAY);
        let err = generator
            .generate_observations(&day(vec![(vec![0], AggregateValue::IndexHistogram(BTreeMap::new()))]))
            .unwrap_err();
        assert!(matches!(err, GenerateError::WrongValueType(_)));
    }

    #[test]
    fn private_report_emits_indices_and_participation() {
        let metric = occurrence_metric();
        let generator = factory().get_generator(&metric, &private_report(), DAY);

        let batches = generator
            .generate_observations(&day(vec![
                (vec![0], AggregateValue::Integer(1)),
                (vec![1], AggregateValue::Integer(4)),
            ]))
            .unwrap();
        assert_eq!(batches.len(), 1);

        // The step source never fabricates noise.
        let types = observation_types(&batches[0]);
        assert_eq!(
            types,
            vec![
                ObservationType::PrivateIndex(cobalt_core::wire::PrivateIndexObservation {
                    index: 0
                }),
                ObservationType::PrivateIndex(cobalt_core::wire::PrivateIndexObservation {
                    index: 4 + 3
                }),
                ObservationType::ReportParticipation(
                    cobalt_core::wire::ReportParticipationObservation {}
                ),
            ]
        );
    }

    #[test]
    fn private_report_participates_without_data() {
        let metric = occurrence_metric();
        let generator = factory().get_generator(&metric, &private_report(), DAY);

        let batches = generator
            .generate_observations(&DayAggregates::empty(DAY))
            .unwrap();
        assert_eq!(batches.len(), 1);
        let profile = batches[0].metadata.as_ref().unwrap().system_profile.as_ref().unwrap();
        assert_eq!(profile.arch, "arm64");
        assert!(profile.os.is_empty());
        assert_eq!(batches[0].observation_count(), 1);
    }

    #[test]
    fn string_report_carries_hashes_and_histograms() {
        let metric = MetricDefinition::new(5, MetricType::String);
        let report = ReportDefinition::new(6, ReportType::StringCounts);
        let generator = factory().get_generator(&metric, &report, DAY);

        let mut aggregates = day(vec![(
            vec![2],
            AggregateValue::IndexHistogram(BTreeMap::from([(0, 3), (1, 1)])),
        )]);
        aggregates.string_hashes = vec![vec![0xaa; 32], vec![0xbb; 32]];

        let batches = generator.generate_observations(&aggregates).unwrap();
        let ObservationType::StringHistogram(histogram) = &observation_types(&batches[0])[0] else {
            panic!("expected a string histogram observation");
        };
        assert_eq!(histogram.string_hashes.len(), 2);
        assert_eq!(histogram.string_histograms[0].event_codes, vec![2]);
        assert_eq!(histogram.string_histograms[0].bucket_indices, vec![0, 1]);
        assert_eq!(histogram.string_histograms[0].bucket_counts, vec![3, 1]);
    }

    #[test]
    fn unsupported_combination_fails_generation() {
        let metric = MetricDefinition::new(5, MetricType::String);
        let mut report = ReportDefinition::new(6, ReportType::StringCounts);
        report.privacy_mechanism = PrivacyMechanism::ShuffledDifferentialPrivacy;
        let generator = factory().get_generator(&metric, &report, DAY);
        assert!(generator.generate_observations(&DayAggregates::empty(DAY)).is_err());
    }

    #[test]
    fn negative_day_cannot_be_encoded() {
        let metric = occurrence_metric();
        let report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        let generator = factory().get_generator(&metric, &report, -1);
        let err = generator
            .generate_observations(&day(vec![(vec![0], AggregateValue::Integer(1))]))
            .unwrap_err();
        assert_eq!(err, GenerateError::InvalidDay(-1));
    }

    #[test]
    fn supplier_builds_per_day() {
        let factory = Arc::new(factory());
        let metric = occurrence_metric();
        let report = ReportDefinition::new(4, ReportType::FleetwideOccurrenceCounts);
        let supplier = factory.supplier(&metric, &report);

        let batches = supplier(DAY - 1)
            .generate_observations(&day(vec![(vec![0], AggregateValue::Integer(1))]))
            .unwrap();
        assert_eq!(batches[0].metadata.as_ref().unwrap().day_index, (DAY - 1) as u32);
    }
}
