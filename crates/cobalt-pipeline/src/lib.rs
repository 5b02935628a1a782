//! Cobalt client pipeline.
//!
//! ```text
//! log_occurrence / log_string
//!        │
//!        ▼
//!  CobaltLogger ──► DataService (per-day aggregates)
//!                        │
//!  CobaltPeriodicJob ────┤ generate → cleanup → read
//!        │               │
//!        ▼               ▼
//!  Encrypter ──► EnvelopeBatcher ──► Uploader ──► upload_done
//! ```
//!
//! Collaborators are injected as trait objects so each stage can be
//! replaced in tests.

pub mod crypto;
pub mod data;
pub mod envelope;
pub mod error;
pub mod logger;
pub mod observations;
pub mod periodic;
pub mod upload;

pub use crypto::{EncryptionError, Encrypter, PlaintextEncrypter};
pub use data::{DataService, StoreDataService};
pub use error::{DataError, LoggerError, PipelineError};
pub use logger::CobaltLogger;
pub use observations::{ObservationGeneratorFactory, SecureRandom};
pub use periodic::{
    CobaltPeriodicJob, ENVELOPE_MAX_OBSERVATION_BYTES, LARGEST_AGGREGATION_WINDOW,
    PeriodicJobConfig, RunReport,
};
pub use upload::{DirectoryUploader, UploadError, Uploader};
