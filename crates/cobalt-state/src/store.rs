//! CobaltStore — redb-backed persistence for the Cobalt pipeline.
//!
//! Provides the aggregate writes used by the logger, the generation and
//! cleanup passes used by the periodic job, and the observation queue the
//! uploader drains. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cobalt_core::generator::{DayAggregates, ObservationGenerator, ProfileAggregates};
use cobalt_core::wire::{SystemProfile, UnencryptedObservationBatch};
use cobalt_core::{AggregateValue, EventRecord, EventVector, ReportKey};
use prost::Message;
use redb::{Database, ReadableDatabase, ReadableTable};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A logger disabled for longer than this restarts its enabled time.
const DISABLED_RESET_DAYS: i64 = 2;

/// Oldest day generated behind the target day.
const MAX_BACKFILL_DAYS: i32 = 3;

/// Thread-safe Cobalt store backed by redb.
#[derive(Clone)]
pub struct CobaltStore {
    db: Arc<Database>,
}

impl CobaltStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "cobalt store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory cobalt store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
        txn.open_table(REPORTS).map_err(map_err!(Table))?;
        txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
        txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
        txn.open_table(STRING_HASHES).map_err(map_err!(Table))?;
        txn.open_table(OBSERVATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Enablement ─────────────────────────────────────────────────

    /// Record that the logger is enabled and return its initial enabled time.
    ///
    /// The stored time is kept unless the logger had been disabled for more
    /// than two days, in which case `now` becomes the new initial time. The
    /// disabled marker is cleared either way.
    pub fn logger_enabled(&self, now: DateTime<Utc>) -> StateResult<DateTime<Utc>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let enabled;
        {
            let mut globals = txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
            let stored = read_time(&globals, INITIAL_ENABLED_TIME)?;
            let disabled = read_time(&globals, INITIAL_DISABLED_TIME)?;
            let reset = disabled.is_some_and(|d| d < now - Duration::days(DISABLED_RESET_DAYS));

            enabled = match stored {
                Some(time) if !reset => time,
                _ => {
                    let value = now.to_rfc3339();
                    globals
                        .insert(INITIAL_ENABLED_TIME, value.as_str())
                        .map_err(map_err!(Write))?;
                    if reset {
                        info!(%now, "logger re-enabled after long disable, resetting enabled time");
                    }
                    now
                }
            };
            globals
                .remove(INITIAL_DISABLED_TIME)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(enabled)
    }

    /// Record that the logger is disabled. Only the first time is kept.
    pub fn logger_disabled(&self, now: DateTime<Utc>) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut globals = txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
            if read_time(&globals, INITIAL_DISABLED_TIME)?.is_none() {
                let value = now.to_rfc3339();
                globals
                    .insert(INITIAL_DISABLED_TIME, value.as_str())
                    .map_err(map_err!(Write))?;
                debug!(%now, "logger disabled time recorded");
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn enablement_times(&self) -> StateResult<EnablementTimes> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let globals = txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
        Ok(EnablementTimes {
            initial_enabled: read_time(&globals, INITIAL_ENABLED_TIME)?,
            initial_disabled: read_time(&globals, INITIAL_DISABLED_TIME)?,
        })
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Add `count` to the aggregate of (report, day, profile, event vector).
    ///
    /// A new event vector is refused once the (report, day, profile) holds
    /// `event_vector_buffer_max` distinct vectors (0 is unlimited).
    pub fn aggregate_count(
        &self,
        report: &ReportKey,
        day_index: i32,
        profile: &SystemProfile,
        event_vector: &EventVector,
        event_vector_buffer_max: u64,
        count: i64,
    ) -> StateResult<AggregateOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let mut profiles = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
            let mut aggregates = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;

            register_report(&mut reports, report, day_index)?;
            let profile_hash = store_profile(&mut profiles, profile)?;
            outcome = upsert_aggregate(
                &mut aggregates,
                AggregateEntry {
                    report_key: *report,
                    day_index,
                    system_profile_hash: profile_hash,
                    event_vector: event_vector.clone(),
                    value: AggregateValue::Integer(count),
                },
                event_vector_buffer_max,
            )?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    /// Count one occurrence of `value` for (report, day, profile, event vector).
    ///
    /// The string is hashed and assigned the next list index of the day; a
    /// new string is refused once the day holds `string_buffer_max` strings.
    pub fn aggregate_string(
        &self,
        report: &ReportKey,
        day_index: i32,
        profile: &SystemProfile,
        event_vector: &EventVector,
        limits: StringLimits,
        value: &str,
    ) -> StateResult<AggregateOutcome> {
        let hash = hex::encode(Sha256::digest(value.as_bytes()));
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let mut profiles = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
            let mut aggregates = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
            let mut strings = txn.open_table(STRING_HASHES).map_err(map_err!(Table))?;

            register_report(&mut reports, report, day_index)?;
            let profile_hash = store_profile(&mut profiles, profile)?;

            let prefix = day_prefix(report, day_index);
            let known = scan_string_hashes(&strings, &prefix)?;
            let (list_index, is_new) = match known.iter().find(|e| e.hash == hash) {
                Some(entry) => (entry.list_index, false),
                None => (known.len() as u32, true),
            };

            outcome = if is_new
                && limits.string_buffer_max > 0
                && known.len() as u64 >= limits.string_buffer_max
            {
                AggregateOutcome::StringBufferFull
            } else {
                upsert_aggregate(
                    &mut aggregates,
                    AggregateEntry {
                        report_key: *report,
                        day_index,
                        system_profile_hash: profile_hash,
                        event_vector: event_vector.clone(),
                        value: AggregateValue::IndexHistogram(BTreeMap::from([(list_index, 1)])),
                    },
                    limits.event_vector_buffer_max,
                )?
            };

            // A string only takes a list slot once it has been counted.
            if is_new && outcome.is_stored() {
                let entry = StringHashEntry {
                    report_key: *report,
                    day_index,
                    list_index,
                    hash,
                };
                let key = format!("{prefix}{list_index:08}");
                let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                strings
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    /// All aggregate rows of a report, in key order.
    pub fn list_aggregates(&self, report: &ReportKey) -> StateResult<Vec<AggregateEntry>> {
        let prefix = format!("{}|", report.table_key());
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
        scan_aggregates(&table, &prefix)
    }

    /// The stored aggregates of one report-day, grouped by system profile.
    pub fn day_aggregates(&self, report: &ReportKey, day_index: i32) -> StateResult<DayAggregates> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let aggregates = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
        let strings = txn.open_table(STRING_HASHES).map_err(map_err!(Table))?;
        let profiles = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
        read_day(&aggregates, &strings, &profiles, report, day_index)
    }

    pub fn system_profile_count(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    // ── Report bookkeeping ─────────────────────────────────────────

    pub fn last_sent_day_index(&self, report: &ReportKey) -> StateResult<Option<i32>> {
        let key = report.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        Ok(table
            .get(key.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value()))
    }

    /// Insert or overwrite a report's last sent day.
    pub fn insert_last_sent_day_index(&self, report: &ReportKey, day_index: i32) -> StateResult<()> {
        let key = report.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), day_index)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Keys of every report the store knows about.
    pub fn report_keys(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    // ── Generation ─────────────────────────────────────────────────

    /// Generate and store observations for every unsent day of a report up
    /// to `day_index_to_generate`, then mark that day as sent.
    ///
    /// A report seen for the first time is only registered. Generation
    /// starts no earlier than three days before the target day and no
    /// earlier than `day_index_logger_enabled`. Any generator failure
    /// aborts the whole transaction. Returns the number of batches stored.
    pub fn generate_observations(
        &self,
        report: &ReportKey,
        day_index_to_generate: i32,
        day_index_logger_enabled: i32,
        supplier: &dyn Fn(i32) -> Box<dyn ObservationGenerator>,
    ) -> StateResult<usize> {
        let key = report.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut stored = 0;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let last_sent = reports
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value());

            match last_sent {
                None => {
                    reports
                        .insert(key.as_str(), day_index_to_generate)
                        .map_err(map_err!(Write))?;
                    debug!(%report, day_index = day_index_to_generate, "report registered for generation");
                }
                Some(last_sent) => {
                    let first = (last_sent + 1)
                        .max(day_index_to_generate - MAX_BACKFILL_DAYS)
                        .max(day_index_logger_enabled);

                    let aggregates = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
                    let strings = txn.open_table(STRING_HASHES).map_err(map_err!(Table))?;
                    let profiles = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
                    let mut globals = txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
                    let mut observations =
                        txn.open_table(OBSERVATIONS).map_err(map_err!(Table))?;

                    for day_index in first..=day_index_to_generate {
                        let day = read_day(&aggregates, &strings, &profiles, report, day_index)?;
                        let batches = supplier(day_index)
                            .generate_observations(&day)
                            .map_err(map_err!(Generate))?;
                        for batch in batches {
                            let id = next_observation_id(&mut globals)?;
                            let bytes = batch.encode_to_vec();
                            observations
                                .insert(id, bytes.as_slice())
                                .map_err(map_err!(Write))?;
                            stored += 1;
                        }
                        debug!(%report, day_index, "day generated");
                    }

                    if day_index_to_generate > last_sent {
                        reports
                            .insert(key.as_str(), day_index_to_generate)
                            .map_err(map_err!(Write))?;
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Delete data that will never be generated again.
    ///
    /// Removes aggregates and string hashes at or before `day_index_watermark`,
    /// every row of reports not in `relevant`, and system profiles no
    /// remaining aggregate refers to.
    pub fn cleanup(
        &self,
        relevant: &[ReportKey],
        day_index_watermark: i32,
    ) -> StateResult<CleanupStats> {
        let relevant: HashSet<ReportKey> = relevant.iter().copied().collect();
        let relevant_keys: HashSet<String> = relevant.iter().map(ReportKey::table_key).collect();
        let mut stats = CleanupStats::default();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let mut profiles = txn.open_table(SYSTEM_PROFILES).map_err(map_err!(Table))?;
            let mut aggregates = txn.open_table(AGGREGATES).map_err(map_err!(Table))?;
            let mut strings = txn.open_table(STRING_HASHES).map_err(map_err!(Table))?;

            let mut stale = Vec::new();
            let mut referenced = HashSet::new();
            for entry in aggregates.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let row: AggregateEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if row.day_index <= day_index_watermark || !relevant.contains(&row.report_key) {
                    stale.push(key.value().to_string());
                } else {
                    referenced.insert(row.system_profile_hash);
                }
            }
            for key in &stale {
                aggregates.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.aggregates_deleted = stale.len() as u64;

            let mut stale = Vec::new();
            for entry in strings.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let row: StringHashEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if row.day_index <= day_index_watermark || !relevant.contains(&row.report_key) {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                strings.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.string_hashes_deleted = stale.len() as u64;

            let mut stale = Vec::new();
            for entry in reports.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if !relevant_keys.contains(key.value()) {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                reports.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.reports_deleted = stale.len() as u64;

            let mut stale = Vec::new();
            for entry in profiles.iter().map_err(map_err!(Read))? {
                let (hash, _) = entry.map_err(map_err!(Read))?;
                if !referenced.contains(&hash.value()) {
                    stale.push(hash.value());
                }
            }
            for hash in &stale {
                profiles.remove(*hash).map_err(map_err!(Write))?;
            }
            stats.profiles_deleted = stale.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            watermark = day_index_watermark,
            aggregates = stats.aggregates_deleted,
            strings = stats.string_hashes_deleted,
            reports = stats.reports_deleted,
            profiles = stats.profiles_deleted,
            "cleanup finished"
        );
        Ok(stats)
    }

    // ── Observations ───────────────────────────────────────────────

    /// Every stored observation batch, oldest first.
    pub fn oldest_observations(&self) -> StateResult<Vec<ObservationStoreEntity>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBSERVATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (id, value) = entry.map_err(map_err!(Read))?;
            let batch = UnencryptedObservationBatch::decode(value.value())
                .map_err(map_err!(Deserialize))?;
            results.push(ObservationStoreEntity {
                id: id.value(),
                batch,
            });
        }
        Ok(results)
    }

    /// Queue observation batches directly. Returns their ids.
    pub fn insert_observations(
        &self,
        batches: &[UnencryptedObservationBatch],
    ) -> StateResult<Vec<u64>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut ids = Vec::with_capacity(batches.len());
        {
            let mut globals = txn.open_table(GLOBAL_VALUES).map_err(map_err!(Table))?;
            let mut table = txn.open_table(OBSERVATIONS).map_err(map_err!(Table))?;
            for batch in batches {
                let id = next_observation_id(&mut globals)?;
                let bytes = batch.encode_to_vec();
                table.insert(id, bytes.as_slice()).map_err(map_err!(Write))?;
                ids.push(id);
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(ids)
    }

    /// Delete observations by id. Returns the number that existed.
    pub fn remove_observations(&self, ids: &[u64]) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(OBSERVATIONS).map_err(map_err!(Table))?;
            for id in ids {
                if table.remove(*id).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed, "observations removed");
        Ok(removed)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn day_prefix(report: &ReportKey, day_index: i32) -> String {
    format!("{}|{}|", report.table_key(), day_index)
}

fn aggregate_key(entry: &AggregateEntry) -> String {
    format!(
        "{}{:016x}|{}",
        day_prefix(&entry.report_key, entry.day_index),
        entry.system_profile_hash,
        entry.event_vector.table_key()
    )
}

/// First eight bytes of the SHA-256 of the profile's protobuf encoding.
pub fn system_profile_hash(profile: &SystemProfile) -> u64 {
    let digest = Sha256::digest(profile.encode_to_vec());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn read_time(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> StateResult<Option<DateTime<Utc>>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let time = DateTime::parse_from_rfc3339(guard.value())
                .map_err(map_err!(Deserialize))?
                .with_timezone(&Utc);
            Ok(Some(time))
        }
        None => Ok(None),
    }
}

fn next_observation_id(globals: &mut redb::Table<&'static str, &'static str>) -> StateResult<u64> {
    let current = match globals.get(NEXT_OBSERVATION_ID).map_err(map_err!(Read))? {
        Some(guard) => guard
            .value()
            .parse::<u64>()
            .map_err(map_err!(Deserialize))?,
        None => 1,
    };
    let next = (current + 1).to_string();
    globals
        .insert(NEXT_OBSERVATION_ID, next.as_str())
        .map_err(map_err!(Write))?;
    Ok(current)
}

/// Register a report on its first aggregate so the day before is treated as sent.
fn register_report(
    reports: &mut redb::Table<&'static str, i32>,
    report: &ReportKey,
    day_index: i32,
) -> StateResult<()> {
    let key = report.table_key();
    if reports.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
        reports
            .insert(key.as_str(), day_index - 1)
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

fn store_profile(
    profiles: &mut redb::Table<u64, &'static [u8]>,
    profile: &SystemProfile,
) -> StateResult<u64> {
    let hash = system_profile_hash(profile);
    if profiles.get(hash).map_err(map_err!(Read))?.is_none() {
        let bytes = profile.encode_to_vec();
        profiles
            .insert(hash, bytes.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(hash)
}

fn upsert_aggregate(
    aggregates: &mut redb::Table<&'static str, &'static [u8]>,
    entry: AggregateEntry,
    event_vector_buffer_max: u64,
) -> StateResult<AggregateOutcome> {
    let key = aggregate_key(&entry);
    let existing: Option<AggregateEntry> = match aggregates.get(key.as_str()).map_err(map_err!(Read))? {
        Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
        None => None,
    };

    let row = match existing {
        Some(mut row) => {
            if !row.value.merge(&entry.value) {
                return Err(StateError::Conflict(format!(
                    "aggregate {key} holds a different value type"
                )));
            }
            row
        }
        None => {
            if event_vector_buffer_max > 0 {
                let profile_prefix = format!(
                    "{}{:016x}|",
                    day_prefix(&entry.report_key, entry.day_index),
                    entry.system_profile_hash
                );
                let vectors = scan_aggregates(&*aggregates, &profile_prefix)?.len() as u64;
                if vectors >= event_vector_buffer_max {
                    return Ok(AggregateOutcome::EventVectorBufferFull);
                }
            }
            entry
        }
    };

    let bytes = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
    aggregates
        .insert(key.as_str(), bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(AggregateOutcome::Stored)
}

fn scan_aggregates(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<AggregateEntry>> {
    let mut results = Vec::new();
    for entry in table.range::<&str>(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        let row: AggregateEntry =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(row);
    }
    Ok(results)
}

fn scan_string_hashes(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<StringHashEntry>> {
    let mut results = Vec::new();
    for entry in table.range::<&str>(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        let row: StringHashEntry =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(row);
    }
    results.sort_by_key(|row| row.list_index);
    Ok(results)
}

fn read_day(
    aggregates: &impl ReadableTable<&'static str, &'static [u8]>,
    strings: &impl ReadableTable<&'static str, &'static [u8]>,
    profiles: &impl ReadableTable<u64, &'static [u8]>,
    report: &ReportKey,
    day_index: i32,
) -> StateResult<DayAggregates> {
    let prefix = day_prefix(report, day_index);

    let mut by_profile: BTreeMap<u64, Vec<EventRecord>> = BTreeMap::new();
    for row in scan_aggregates(aggregates, &prefix)? {
        by_profile
            .entry(row.system_profile_hash)
            .or_default()
            .push(EventRecord {
                event_vector: row.event_vector,
                aggregate_value: row.value,
            });
    }

    let mut day = DayAggregates::empty(day_index);
    for (hash, records) in by_profile {
        let system_profile = match profiles.get(hash).map_err(map_err!(Read))? {
            Some(guard) => {
                SystemProfile::decode(guard.value()).map_err(map_err!(Deserialize))?
            }
            None => return Err(StateError::NotFound(format!("system profile {hash:016x}"))),
        };
        day.profiles.push(ProfileAggregates {
            system_profile,
            records,
        });
    }

    for row in scan_string_hashes(strings, &prefix)? {
        let hash = hex::decode(&row.hash).map_err(map_err!(Deserialize))?;
        day.string_hashes.push(hash);
    }
    Ok(day)
}
