//! Mapping of (event vector, value) pairs into a report's private index space.
//!
//! The index of a pair is `event_vector_index * num_index_points + value_index`.
//! Event vectors are numbered in mixed radix over the metric's dimensions,
//! first dimension least significant.

use cobalt_core::{GenerateError, MetricDefinition, ReportDefinition};

use super::privacy::SecureRandom;

/// Position of an event vector among all vectors the metric can produce.
pub fn event_vector_index(
    metric: &MetricDefinition,
    event_codes: &[u32],
) -> Result<u64, GenerateError> {
    let out_of_range = || GenerateError::EventVectorOutOfRange(event_codes.to_vec());
    if event_codes.len() != metric.dimensions.len() {
        return Err(out_of_range());
    }

    let mut index = 0u64;
    let mut stride = 1u64;
    for (dimension, &code) in metric.dimensions.iter().zip(event_codes) {
        let position = if dimension.max_event_code != 0 {
            if code > dimension.max_event_code {
                return Err(out_of_range());
            }
            u64::from(code)
        } else {
            dimension
                .event_codes
                .iter()
                .position(|&c| c == code)
                .ok_or_else(out_of_range)? as u64
        };
        index += position * stride;
        stride *= dimension.cardinality();
    }
    Ok(index)
}

/// Clamp `value` to the report's range and round it onto one of
/// `num_index_points` evenly spaced points, rounding up with probability
/// equal to the fractional distance.
pub fn value_index(report: &ReportDefinition, value: i64, random: &SecureRandom) -> u64 {
    let points = u64::from(report.num_index_points);
    if points <= 1 || report.max_value <= report.min_value {
        return 0;
    }
    let clamped = value.clamp(report.min_value, report.max_value);
    let step = (report.max_value - report.min_value) as f64 / (points - 1) as f64;
    let position = (clamped - report.min_value) as f64 / step;
    let lower = position.floor();
    let index = if random.uniform() < position - lower {
        lower as u64 + 1
    } else {
        lower as u64
    };
    index.min(points - 1)
}

/// Private index of one aggregated (event vector, value) pair.
pub fn private_index(
    metric: &MetricDefinition,
    report: &ReportDefinition,
    event_codes: &[u32],
    value: i64,
    random: &SecureRandom,
) -> Result<u64, GenerateError> {
    let vector = event_vector_index(metric, event_codes)?;
    Ok(vector * u64::from(report.num_index_points) + value_index(report, value, random))
}
