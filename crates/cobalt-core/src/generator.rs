//! Contract between storage and the observation generators.
//!
//! Storage reads one day of aggregates for a report, hands them to a
//! generator, and persists whatever batches come back in the same
//! transaction that advances the report's last sent day.

use std::sync::Arc;

use thiserror::Error;

use crate::types::EventRecord;
use crate::wire::{SystemProfile, UnencryptedObservationBatch};

/// Aggregates of one system profile for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileAggregates {
    pub system_profile: SystemProfile,
    pub records: Vec<EventRecord>,
}

/// Everything stored for one report on one day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayAggregates {
    pub day_index: i32,
    pub profiles: Vec<ProfileAggregates>,
    /// String hashes ordered by list index.
    pub string_hashes: Vec<Vec<u8>>,
}

impl DayAggregates {
    pub fn empty(day_index: i32) -> Self {
        Self {
            day_index,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.iter().all(|p| p.records.is_empty())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GenerateError {
    #[error("aggregate value has the wrong type for report {0}")]
    WrongValueType(String),

    #[error("event vector {0:?} is outside the metric's dimensions")]
    EventVectorOutOfRange(Vec<u32>),

    #[error("day index {0} cannot be encoded")]
    InvalidDay(i32),

    #[error("generation failed: {0}")]
    Other(String),
}

/// Turns one day of aggregates into observation batches.
pub trait ObservationGenerator: Send {
    fn generate_observations(
        &self,
        day: &DayAggregates,
    ) -> Result<Vec<UnencryptedObservationBatch>, GenerateError>;
}

/// Produces the generator for a given day index.
pub type GeneratorSupplier = Arc<dyn Fn(i32) -> Box<dyn ObservationGenerator> + Send + Sync>;
