//! Error types for the Cobalt pipeline.

use cobalt_core::MetricType;
use cobalt_state::StateError;
use thiserror::Error;

pub type LoggerResult<T> = Result<T, LoggerError>;
pub type DataResult<T> = Result<T, DataError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures returned to callers of the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown metric id {0}")]
    UnknownMetric(u32),

    #[error("metric {metric_id} has wrong metric type: expected {expected:?}, found {found:?}")]
    WrongMetricType {
        metric_id: u32,
        expected: MetricType,
        found: MetricType,
    },

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Failures at the storage boundary.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Failures that end a periodic run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("internal error: {0}")]
    Internal(String),
}
