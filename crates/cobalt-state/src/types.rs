//! Row types persisted by the store.

use chrono::{DateTime, Utc};
use cobalt_core::wire::UnencryptedObservationBatch;
use cobalt_core::{AggregateValue, EventVector, ReportKey};
use serde::{Deserialize, Serialize};

/// One aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub report_key: ReportKey,
    pub day_index: i32,
    pub system_profile_hash: u64,
    pub event_vector: EventVector,
    pub value: AggregateValue,
}

/// A string seen for a report on a day, with its position in the day's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringHashEntry {
    pub report_key: ReportKey,
    pub day_index: i32,
    pub list_index: u32,
    /// Hex-encoded SHA-256 of the string.
    pub hash: String,
}

/// A stored observation batch waiting for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationStoreEntity {
    pub id: u64,
    pub batch: UnencryptedObservationBatch,
}

/// Result of an aggregate write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Stored,
    /// The (report, day, profile) already holds the maximum number of event vectors.
    EventVectorBufferFull,
    /// The (report, day) already holds the maximum number of strings.
    StringBufferFull,
}

impl AggregateOutcome {
    pub fn is_stored(self) -> bool {
        self == AggregateOutcome::Stored
    }
}

/// Buffer limits applied to string aggregation. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringLimits {
    pub event_vector_buffer_max: u64,
    pub string_buffer_max: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub aggregates_deleted: u64,
    pub string_hashes_deleted: u64,
    pub reports_deleted: u64,
    pub profiles_deleted: u64,
}

/// Stored enablement markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnablementTimes {
    pub initial_enabled: Option<DateTime<Utc>>,
    pub initial_disabled: Option<DateTime<Utc>>,
}
