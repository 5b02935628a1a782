//! cobalt-metrics — observability for the Cobalt pipeline itself.
//!
//! Counts uploads, generation failures, and aggregates dropped by buffer
//! limits, and renders them in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! OperationLogger (trait)        ← called by the logger and periodic job
//!   └── OperationCounters        ← atomics + per-report map
//!         └── snapshot() → OperationSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus(&OperationSnapshot)
//! ```

pub mod counters;
pub mod prometheus;

pub use counters::{
    NoopOperationLogger, OperationCounters, OperationLogger, OperationSnapshot, ReportSnapshot,
};
pub use prometheus::render_prometheus;
