//! Value types shared across Cobalt crates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Addresses one aggregation bucket: a report of a metric of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportKey {
    pub customer_id: u32,
    pub project_id: u32,
    pub metric_id: u32,
    pub report_id: u32,
}

impl ReportKey {
    pub const fn new(customer_id: u32, project_id: u32, metric_id: u32, report_id: u32) -> Self {
        Self {
            customer_id,
            project_id,
            metric_id,
            report_id,
        }
    }

    /// Build the composite key used by storage tables.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.customer_id, self.project_id, self.metric_id, self.report_id
        )
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.customer_id, self.project_id, self.metric_id, self.report_id
        )
    }
}

/// Ordered event codes describing the dimensional breakdown of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EventVector(Vec<u32>);

impl EventVector {
    pub fn new(codes: Vec<u32>) -> Self {
        Self(codes)
    }

    pub fn codes(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable textual form used inside storage keys.
    pub fn table_key(&self) -> String {
        self.0
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<Vec<u32>> for EventVector {
    fn from(codes: Vec<u32>) -> Self {
        Self(codes)
    }
}

/// The stored aggregate for one (report, day, profile, event vector) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AggregateValue {
    /// Additive occurrence count.
    Integer(i64),
    /// String list index → number of occurrences.
    IndexHistogram(BTreeMap<u32, i64>),
}

impl AggregateValue {
    /// Fold `other` into `self`. Mismatched kinds keep `self` untouched and
    /// return false.
    pub fn merge(&mut self, other: &AggregateValue) -> bool {
        match (self, other) {
            (AggregateValue::Integer(a), AggregateValue::Integer(b)) => {
                *a = a.saturating_add(*b);
                true
            }
            (AggregateValue::IndexHistogram(a), AggregateValue::IndexHistogram(b)) => {
                for (index, count) in b {
                    let entry = a.entry(*index).or_insert(0);
                    *entry = entry.saturating_add(*count);
                }
                true
            }
            _ => false,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AggregateValue::Integer(v) => Some(*v),
            AggregateValue::IndexHistogram(_) => None,
        }
    }
}

/// One aggregated event row read back for observation generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_vector: EventVector,
    pub aggregate_value: AggregateValue,
}
