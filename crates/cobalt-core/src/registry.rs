//! Metric registry: the immutable Customer → Project → Metric → Report tree.
//!
//! The registry is loaded once at startup and shared read-only. A process
//! serves exactly one customer and one project; anything else is rejected
//! when the registry is built. Reports that the client cannot produce are
//! dropped from the registry with a warning so the rest keep working.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::ReportKey;

/// Ordered maturity gate. Later stages reach more devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStage {
    Debug,
    Fishfood,
    Dogfood,
    OpenBeta,
    Ga,
}

impl ReleaseStage {
    /// Whether an entity declaring `max` may run in a process at `self`.
    pub fn permits(self, max: Option<ReleaseStage>) -> bool {
        max.is_none_or(|max| self <= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Occurrence,
    Integer,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    FleetwideOccurrenceCounts,
    StringCounts,
    UniqueDeviceCounts,
    FleetwideHistograms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMechanism {
    #[default]
    DeIdentification,
    ShuffledDifferentialPrivacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemProfileField {
    Os,
    Arch,
    BoardName,
    ProductName,
    SystemVersion,
    AppVersion,
    Channel,
}

/// How a metric's events are bucketed into days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TimeZonePolicy {
    #[default]
    Utc,
    /// The host's local time zone.
    Local,
    FixedOffset { minutes_east: i32 },
}

/// One dimension of a metric's event vector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricDimension {
    #[serde(default)]
    pub dimension: String,
    /// When non-zero, codes cover `0..=max_event_code`.
    #[serde(default)]
    pub max_event_code: u32,
    /// Enumerated codes, used when `max_event_code` is zero.
    #[serde(default)]
    pub event_codes: Vec<u32>,
}

impl MetricDimension {
    /// Number of distinct codes in this dimension.
    pub fn cardinality(&self) -> u64 {
        if self.max_event_code != 0 {
            u64::from(self.max_event_code) + 1
        } else {
            self.event_codes.len() as u64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: u32,
    pub report_type: ReportType,
    #[serde(default)]
    pub privacy_mechanism: PrivacyMechanism,
    #[serde(default)]
    pub max_release_stage: Option<ReleaseStage>,
    /// Distinct event vectors kept per report/day/profile; 0 is unlimited.
    #[serde(default)]
    pub event_vector_buffer_max: u64,
    /// Distinct strings kept per report/day; 0 is unlimited.
    #[serde(default)]
    pub string_buffer_max: u64,
    #[serde(default)]
    pub system_profile_fields: Vec<SystemProfileField>,
    #[serde(default)]
    pub min_value: i64,
    #[serde(default)]
    pub max_value: i64,
    #[serde(default)]
    pub num_index_points: u32,
    #[serde(default)]
    pub poisson_mean: f64,
}

impl ReportDefinition {
    /// A de-identified report of the given type with every optional field unset.
    pub fn new(id: u32, report_type: ReportType) -> Self {
        Self {
            id,
            report_type,
            privacy_mechanism: PrivacyMechanism::DeIdentification,
            max_release_stage: None,
            event_vector_buffer_max: 0,
            string_buffer_max: 0,
            system_profile_fields: Vec::new(),
            min_value: 0,
            max_value: 0,
            num_index_points: 0,
            poisson_mean: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub metric_type: MetricType,
    #[serde(default)]
    pub max_release_stage: Option<ReleaseStage>,
    #[serde(default)]
    pub time_zone: TimeZonePolicy,
    #[serde(default)]
    pub dimensions: Vec<MetricDimension>,
    #[serde(default)]
    pub reports: Vec<ReportDefinition>,
}

impl MetricDefinition {
    pub fn new(id: u32, metric_type: MetricType) -> Self {
        Self {
            id,
            name: String::new(),
            metric_type,
            max_release_stage: None,
            time_zone: TimeZonePolicy::Utc,
            dimensions: Vec::new(),
            reports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("registry has no customer/project")]
    Empty,

    #[error("registry has {0} customers, exactly one is supported")]
    MultipleCustomers(usize),

    #[error("registry has {0} projects, exactly one is supported")]
    MultipleProjects(usize),

    #[error("metric {0} is defined more than once")]
    DuplicateMetric(u32),

    #[error("report {report_id} of metric {metric_id} is invalid: {reason}")]
    InvalidReport {
        metric_id: u32,
        report_id: u32,
        reason: String,
    },
}

/// The validated, single-project registry shared by the logger and job.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    customer_id: u32,
    project_id: u32,
    metrics: Vec<MetricDefinition>,
}

impl Registry {
    /// Build from a list of customers, enforcing a single customer and project.
    pub fn from_customers(customers: Vec<Customer>) -> Result<Self, RegistryError> {
        let mut customers = customers;
        match customers.len() {
            0 => return Err(RegistryError::Empty),
            1 => {}
            n => return Err(RegistryError::MultipleCustomers(n)),
        }
        let customer = customers.remove(0);
        let mut projects = customer.projects;
        match projects.len() {
            0 => return Err(RegistryError::Empty),
            1 => {}
            n => return Err(RegistryError::MultipleProjects(n)),
        }
        let project = projects.remove(0);
        Self::new(customer.id, project.id, project.metrics)
    }

    /// Build for one project. Invalid reports are dropped with a warning.
    pub fn new(
        customer_id: u32,
        project_id: u32,
        metrics: Vec<MetricDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut seen = std::collections::HashSet::new();
        let mut validated = Vec::with_capacity(metrics.len());
        for mut metric in metrics {
            if !seen.insert(metric.id) {
                return Err(RegistryError::DuplicateMetric(metric.id));
            }
            let reports = std::mem::take(&mut metric.reports);
            for report in reports {
                match validate_report(&metric, &report) {
                    Ok(()) => metric.reports.push(report),
                    Err(e) => warn!(error = %e, "dropping unsupported report"),
                }
            }
            validated.push(metric);
        }

        Ok(Self {
            customer_id,
            project_id,
            metrics: validated,
        })
    }

    pub fn customer_id(&self) -> u32 {
        self.customer_id
    }

    pub fn project_id(&self) -> u32 {
        self.project_id
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    pub fn metric(&self, metric_id: u32) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.id == metric_id)
    }

    pub fn report_key(&self, metric: &MetricDefinition, report: &ReportDefinition) -> ReportKey {
        ReportKey::new(self.customer_id, self.project_id, metric.id, report.id)
    }

    /// Every report key registered for this project.
    pub fn report_keys(&self) -> Vec<ReportKey> {
        self.metrics
            .iter()
            .flat_map(|m| m.reports.iter().map(move |r| self.report_key(m, r)))
            .collect()
    }
}

/// Check that a metric/report combination is one this client can collect.
pub fn validate_report(
    metric: &MetricDefinition,
    report: &ReportDefinition,
) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidReport {
        metric_id: metric.id,
        report_id: report.id,
        reason,
    };

    let type_allowed = matches!(
        (metric.metric_type, report.report_type),
        (MetricType::Occurrence, ReportType::FleetwideOccurrenceCounts)
            | (MetricType::String, ReportType::StringCounts)
    );
    if !type_allowed {
        return Err(invalid(format!(
            "metric type {:?} does not support report type {:?}",
            metric.metric_type, report.report_type
        )));
    }

    let private = report.privacy_mechanism == PrivacyMechanism::ShuffledDifferentialPrivacy;
    if private && report.report_type != ReportType::FleetwideOccurrenceCounts {
        return Err(invalid(format!(
            "privacy mechanism {:?} is not supported for {:?}",
            report.privacy_mechanism, report.report_type
        )));
    }

    if private {
        if report.min_value <= 0 || report.max_value < report.min_value {
            return Err(invalid(format!(
                "min value ({}) and max value ({}) are not a valid range",
                report.min_value, report.max_value
            )));
        }
        if report.num_index_points == 0 {
            return Err(invalid("num_index_points must be set".to_string()));
        }
        if !(report.poisson_mean > 0.0) {
            return Err(invalid("poisson_mean must be positive".to_string()));
        }
        match num_private_indices(metric, report) {
            Some(n) if n > 0 && n < i32::MAX as u64 => {}
            _ => return Err(invalid("private index space is empty or too large".to_string())),
        }
    } else if report.min_value != 0 || report.max_value != 0 {
        return Err(invalid("min/max values are only used by private reports".to_string()));
    }

    let unsupported_field = report.system_profile_fields.iter().find(|f| {
        !matches!(
            f,
            SystemProfileField::AppVersion
                | SystemProfileField::Arch
                | SystemProfileField::BoardName
                | SystemProfileField::Os
                | SystemProfileField::SystemVersion
        )
    });
    if let Some(field) = unsupported_field {
        return Err(invalid(format!("system profile field {field:?} is not supported")));
    }

    if let (Some(metric_max), Some(report_max)) =
        (metric.max_release_stage, report.max_release_stage)
    {
        if report_max > metric_max {
            return Err(invalid(format!(
                "report max release stage {report_max:?} is later than metric's {metric_max:?}"
            )));
        }
    }

    Ok(())
}

/// Size of a report's private index space: every event vector times every
/// value index. `None` on overflow.
pub fn num_private_indices(metric: &MetricDefinition, report: &ReportDefinition) -> Option<u64> {
    metric
        .dimensions
        .iter()
        .try_fold(1u64, |acc, d| acc.checked_mul(d.cardinality()))?
        .checked_mul(u64::from(report.num_index_points))
}
