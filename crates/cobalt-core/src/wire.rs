//! Protobuf messages exchanged with the Cobalt backend.
//!
//! The field numbers are fixed; the messages are declared by hand with the
//! `prost` derive so no build script is needed. Observations are stored in
//! their unencrypted form and only sealed right before upload.

use prost::Message;

/// Device properties attached to every observation batch.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct SystemProfile {
    #[prost(string, tag = "1")]
    pub os: String,
    #[prost(string, tag = "2")]
    pub arch: String,
    #[prost(string, tag = "3")]
    pub board_name: String,
    #[prost(string, tag = "4")]
    pub product_name: String,
    #[prost(string, tag = "5")]
    pub system_version: String,
    #[prost(string, tag = "6")]
    pub app_version: String,
    #[prost(string, tag = "7")]
    pub channel: String,
}

/// Identifies which report and day a batch of observations belongs to.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct ObservationMetadata {
    #[prost(uint32, tag = "1")]
    pub customer_id: u32,
    #[prost(uint32, tag = "2")]
    pub project_id: u32,
    #[prost(uint32, tag = "3")]
    pub metric_id: u32,
    #[prost(uint32, tag = "4")]
    pub report_id: u32,
    #[prost(uint32, tag = "5")]
    pub day_index: u32,
    #[prost(message, optional, tag = "6")]
    pub system_profile: Option<SystemProfile>,
}

/// A single (event vector, value) pair of an integer observation.
#[derive(Clone, PartialEq, Message)]
pub struct IntegerValue {
    #[prost(uint32, repeated, tag = "1")]
    pub event_codes: Vec<u32>,
    #[prost(int64, tag = "2")]
    pub value: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct IntegerObservation {
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<IntegerValue>,
}

/// One index in a report's private index space.
#[derive(Clone, PartialEq, Message)]
pub struct PrivateIndexObservation {
    #[prost(uint64, tag = "1")]
    pub index: u64,
}

/// Marks that the device participated in a privacy-protected report.
#[derive(Clone, PartialEq, Message)]
pub struct ReportParticipationObservation {}

#[derive(Clone, PartialEq, Message)]
pub struct IndexHistogram {
    #[prost(uint32, repeated, tag = "1")]
    pub event_codes: Vec<u32>,
    #[prost(uint32, repeated, tag = "2")]
    pub bucket_indices: Vec<u32>,
    #[prost(int64, repeated, tag = "3")]
    pub bucket_counts: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StringHistogramObservation {
    #[prost(message, repeated, tag = "1")]
    pub string_histograms: Vec<IndexHistogram>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub string_hashes: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ObservationType {
    #[prost(message, tag = "2")]
    Integer(IntegerObservation),
    #[prost(message, tag = "3")]
    PrivateIndex(PrivateIndexObservation),
    #[prost(message, tag = "4")]
    ReportParticipation(ReportParticipationObservation),
    #[prost(message, tag = "5")]
    StringHistogram(StringHistogramObservation),
}

#[derive(Clone, PartialEq, Message)]
pub struct Observation {
    #[prost(bytes = "vec", tag = "1")]
    pub random_id: Vec<u8>,
    #[prost(oneof = "ObservationType", tags = "2, 3, 4, 5")]
    pub observation_type: Option<ObservationType>,
}

/// An observation paired with the contribution id it is sealed under.
#[derive(Clone, PartialEq, Message)]
pub struct ObservationToEncrypt {
    #[prost(message, optional, tag = "1")]
    pub observation: Option<Observation>,
    #[prost(bytes = "vec", tag = "2")]
    pub contribution_id: Vec<u8>,
}

/// Observations as generated and persisted, before encryption.
#[derive(Clone, PartialEq, Message)]
pub struct UnencryptedObservationBatch {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ObservationMetadata>,
    #[prost(message, repeated, tag = "2")]
    pub unencrypted_observations: Vec<ObservationToEncrypt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EncryptionScheme {
    None = 0,
    HybridHpke = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct EncryptedMessage {
    #[prost(enumeration = "EncryptionScheme", tag = "1")]
    pub scheme: i32,
    #[prost(string, tag = "2")]
    pub public_key_fingerprint: String,
    #[prost(bytes = "vec", tag = "3")]
    pub ciphertext: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub contribution_id: Vec<u8>,
}

/// Encrypted observations for one metadata key.
#[derive(Clone, PartialEq, Message)]
pub struct ObservationBatch {
    #[prost(message, optional, tag = "1")]
    pub meta_data: Option<ObservationMetadata>,
    #[prost(message, repeated, tag = "2")]
    pub encrypted_observation: Vec<EncryptedMessage>,
}

/// Top-level upload payload.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(message, repeated, tag = "1")]
    pub batch: Vec<ObservationBatch>,
    #[prost(bytes = "vec", tag = "2")]
    pub api_key: Vec<u8>,
}

impl UnencryptedObservationBatch {
    /// Number of observations carried by this batch.
    pub fn observation_count(&self) -> usize {
        self.unencrypted_observations.len()
    }
}

impl ObservationBatch {
    /// Serialized size of the batch in bytes.
    pub fn serialized_size(&self) -> usize {
        self.encoded_len()
    }
}
