//! cobalt-state — embedded storage for the Cobalt pipeline.
//!
//! Backed by [redb](https://docs.rs/redb), holds per-day aggregates, the
//! observations waiting for upload, and the bookkeeping that ties them
//! together (last sent day per report, logger enablement times).
//!
//! # Architecture
//!
//! Aggregates and string hashes are JSON-serialized into `&[u8]` columns
//! under composite keys `{report}|{day}|...`, so one report-day is a prefix
//! scan. System profiles are stored once, keyed by a hash of their protobuf
//! encoding. Observations keep their protobuf encoding and are keyed by a
//! monotonically increasing id, so id order is creation order.
//!
//! Every mutating operation runs in a single redb write transaction. redb
//! serializes writers, which makes the read-modify-write of an aggregate
//! atomic without further locking.
//!
//! The `CobaltStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{CobaltStore, system_profile_hash};
pub use types::*;
