//! cobalt.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::registry::{
    Customer, MetricDefinition, MetricDimension, MetricType, Project, Registry, RegistryError,
    ReleaseStage, ReportDefinition, ReportType, SystemProfileField,
};
use crate::types::ReportKey;
use crate::wire::SystemProfile;

const DEFAULT_UPLOAD_DONE_DELAY_MS: u64 = 1_000;
const DEFAULT_JOB_INTERVAL_SECS: u64 = 3_600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CobaltConfig {
    pub pipeline: PipelineConfig,
    pub storage: Option<StorageConfig>,
    pub upload: Option<UploadConfig>,
    pub system: Option<SystemConfig>,
    #[serde(default)]
    pub customers: Vec<Customer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub api_key: String,
    pub release_stage: ReleaseStage,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub upload_done_delay_ms: Option<u64>,
    pub job_interval_secs: Option<u64>,
    pub reports_to_ignore: Option<Vec<ReportKey>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. In-memory when unset.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub outbox_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub board_name: Option<String>,
    pub product_name: Option<String>,
    pub system_version: Option<String>,
    pub app_version: Option<String>,
    pub channel: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl CobaltConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CobaltConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build and validate the registry declared under `[[customers]]`.
    pub fn registry(&self) -> Result<Registry, RegistryError> {
        Registry::from_customers(self.customers.clone())
    }

    pub fn upload_done_delay(&self) -> Duration {
        Duration::from_millis(
            self.pipeline
                .upload_done_delay_ms
                .unwrap_or(DEFAULT_UPLOAD_DONE_DELAY_MS),
        )
    }

    pub fn job_interval(&self) -> Duration {
        Duration::from_secs(
            self.pipeline
                .job_interval_secs
                .unwrap_or(DEFAULT_JOB_INTERVAL_SECS),
        )
    }

    pub fn reports_to_ignore(&self) -> HashSet<ReportKey> {
        self.pipeline
            .reports_to_ignore
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage.as_ref().and_then(|s| s.path.as_deref())
    }

    /// The full device profile described by `[system]`.
    pub fn system_profile(&self) -> SystemProfile {
        let system = self.system.clone().unwrap_or_default();
        SystemProfile {
            os: system.os.unwrap_or_default(),
            arch: system.arch.unwrap_or_default(),
            board_name: system.board_name.unwrap_or_default(),
            product_name: system.product_name.unwrap_or_default(),
            system_version: system.system_version.unwrap_or_default(),
            app_version: system.app_version.unwrap_or_default(),
            channel: system.channel.unwrap_or_default(),
        }
    }

    /// Scaffold a cobalt.toml with one customer, project and occurrence metric.
    pub fn scaffold(api_key: &str, customer_id: u32, project_id: u32) -> Self {
        let mut report = ReportDefinition::new(1, ReportType::FleetwideOccurrenceCounts);
        report.event_vector_buffer_max = 100;
        report.system_profile_fields = vec![SystemProfileField::Os, SystemProfileField::Arch];

        let mut metric = MetricDefinition::new(1, MetricType::Occurrence);
        metric.name = "example_occurrences".to_string();
        metric.dimensions = vec![MetricDimension {
            dimension: "status".to_string(),
            max_event_code: 10,
            event_codes: Vec::new(),
        }];
        metric.reports = vec![report];

        CobaltConfig {
            pipeline: PipelineConfig {
                api_key: api_key.to_string(),
                release_stage: ReleaseStage::Ga,
                enabled: true,
                upload_done_delay_ms: Some(DEFAULT_UPLOAD_DONE_DELAY_MS),
                job_interval_secs: Some(DEFAULT_JOB_INTERVAL_SECS),
                reports_to_ignore: None,
            },
            storage: Some(StorageConfig {
                path: Some("cobalt.redb".to_string()),
            }),
            upload: Some(UploadConfig {
                outbox_dir: "outbox".to_string(),
            }),
            system: Some(SystemConfig {
                os: Some(std::env::consts::OS.to_string()),
                arch: Some(std::env::consts::ARCH.to_string()),
                ..Default::default()
            }),
            customers: vec![Customer {
                id: customer_id,
                name: String::new(),
                projects: vec![Project {
                    id: project_id,
                    name: String::new(),
                    metrics: vec![metric],
                }],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TimeZonePolicy;

    #[test]
    fn test_scaffold() {
        let config = CobaltConfig::scaffold("secret", 1, 2);
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("secret"));
        assert!(toml_str.contains("fleetwide_occurrence_counts"));

        let parsed: CobaltConfig = toml::from_str(&toml_str).unwrap();
        let registry = parsed.registry().unwrap();
        assert_eq!(registry.customer_id(), 1);
        assert_eq!(registry.project_id(), 2);
        assert_eq!(registry.report_keys(), vec![ReportKey::new(1, 2, 1, 1)]);
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[pipeline]
api_key = "key"
release_stage = "dogfood"
"#;
        let config: CobaltConfig = toml::from_str(toml_str).unwrap();
        assert!(config.pipeline.enabled);
        assert_eq!(config.pipeline.release_stage, ReleaseStage::Dogfood);
        assert_eq!(config.upload_done_delay(), Duration::from_secs(1));
        assert!(config.storage_path().is_none());
        assert!(config.reports_to_ignore().is_empty());
        assert_eq!(config.registry().unwrap_err(), RegistryError::Empty);
    }

    #[test]
    fn test_parse_registry_and_ignore_set() {
        let toml_str = r#"
[pipeline]
api_key = "key"
release_stage = "ga"
enabled = false
upload_done_delay_ms = 5
reports_to_ignore = [{ customer_id = 1, project_id = 2, metric_id = 3, report_id = 4 }]

[system]
os = "linux"
board_name = "pixel"

[[customers]]
id = 1

[[customers.projects]]
id = 2

[[customers.projects.metrics]]
id = 3
metric_type = "occurrence"
max_release_stage = "open_beta"
time_zone = { policy = "fixed_offset", minutes_east = -420 }

[[customers.projects.metrics.reports]]
id = 4
report_type = "fleetwide_occurrence_counts"
event_vector_buffer_max = 20
system_profile_fields = ["os"]
"#;
        let config: CobaltConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.pipeline.enabled);
        assert_eq!(config.upload_done_delay(), Duration::from_millis(5));
        assert!(config.reports_to_ignore().contains(&ReportKey::new(1, 2, 3, 4)));
        assert_eq!(config.system_profile().board_name, "pixel");
        assert_eq!(config.system_profile().arch, "");

        let registry = config.registry().unwrap();
        let metric = registry.metric(3).unwrap();
        assert_eq!(metric.max_release_stage, Some(ReleaseStage::OpenBeta));
        assert_eq!(metric.time_zone, TimeZonePolicy::FixedOffset { minutes_east: -420 });
        assert_eq!(metric.reports[0].event_vector_buffer_max, 20);
    }
}
