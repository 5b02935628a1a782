//! redb table definitions for the Cobalt store.
//!
//! Report keys render as `{customer}:{project}:{metric}:{report}`; composite
//! keys join their parts with `|`.

use redb::TableDefinition;

/// Process-wide values (enablement times, id counters) keyed by name.
pub const GLOBAL_VALUES: TableDefinition<&str, &str> = TableDefinition::new("global_values");

/// Last day index sent for each known report, keyed by report key.
pub const REPORTS: TableDefinition<&str, i32> = TableDefinition::new("reports");

/// Protobuf-encoded system profiles keyed by profile hash.
pub const SYSTEM_PROFILES: TableDefinition<u64, &[u8]> = TableDefinition::new("system_profiles");

/// Aggregates keyed by `{report}|{day}|{profile_hash}|{event_vector}`.
pub const AGGREGATES: TableDefinition<&str, &[u8]> = TableDefinition::new("aggregates");

/// String hashes keyed by `{report}|{day}|{list_index}`.
pub const STRING_HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("string_hashes");

/// Protobuf-encoded observation batches keyed by observation id.
pub const OBSERVATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("observations");

/// `GLOBAL_VALUES` key of the first time the logger was enabled.
pub const INITIAL_ENABLED_TIME: &str = "initial_enabled_time";

/// `GLOBAL_VALUES` key of the first time the logger was seen disabled.
pub const INITIAL_DISABLED_TIME: &str = "initial_disabled_time";

/// `GLOBAL_VALUES` key of the next observation id to hand out.
pub const NEXT_OBSERVATION_ID: &str = "next_observation_id";
