//! Cobalt core types.
//!
//! Shared by the storage, pipeline, and daemon crates:
//!
//! - `registry`: customers, projects, metrics and reports, with validation
//! - `config`: the `cobalt.toml` file
//! - `clock`: day indices and the injectable wall clock
//! - `wire`: protobuf messages stored locally and sent upstream
//! - `generator`: the contract observation generators implement

pub mod clock;
pub mod config;
pub mod generator;
pub mod registry;
pub mod system;
pub mod types;
pub mod wire;

pub use clock::{CobaltClock, FakeClock, SystemClock, WallClock};
pub use config::CobaltConfig;
pub use generator::{
    DayAggregates, GenerateError, GeneratorSupplier, ObservationGenerator, ProfileAggregates,
};
pub use registry::{
    MetricDefinition, MetricType, PrivacyMechanism, Registry, RegistryError, ReleaseStage,
    ReportDefinition, ReportType, SystemProfileField, TimeZonePolicy,
};
pub use system::SystemData;
pub use types::*;
