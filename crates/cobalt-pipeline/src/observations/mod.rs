//! Turning stored aggregates into observations.

pub mod factory;
mod generators;
pub mod privacy;
pub mod private_index;

pub use factory::ObservationGeneratorFactory;
pub use privacy::SecureRandom;
