//! Encryption of observations and envelopes before upload.

use cobalt_core::wire::{
    EncryptedMessage, EncryptionScheme, Envelope, ObservationBatch, ObservationToEncrypt,
};
use cobalt_state::ObservationStoreEntity;
use prost::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed: {0}")]
    Failed(String),
}

/// Seals wire messages for the backend.
///
/// `None` means there is nothing worth sending.
pub trait Encrypter: Send + Sync {
    fn encrypt_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<EncryptedMessage>, EncryptionError>;

    fn encrypt_observation(
        &self,
        observation: &ObservationToEncrypt,
    ) -> Result<Option<EncryptedMessage>, EncryptionError>;
}

/// Passes serialized messages through unencrypted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextEncrypter;

impl Encrypter for PlaintextEncrypter {
    fn encrypt_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<EncryptedMessage>, EncryptionError> {
        if envelope.batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(EncryptedMessage {
            scheme: EncryptionScheme::None as i32,
            public_key_fingerprint: String::new(),
            ciphertext: envelope.encode_to_vec(),
            contribution_id: Vec::new(),
        }))
    }

    fn encrypt_observation(
        &self,
        observation: &ObservationToEncrypt,
    ) -> Result<Option<EncryptedMessage>, EncryptionError> {
        let Some(inner) = &observation.observation else {
            return Ok(None);
        };
        Ok(Some(EncryptedMessage {
            scheme: EncryptionScheme::None as i32,
            public_key_fingerprint: String::new(),
            ciphertext: inner.encode_to_vec(),
            contribution_id: observation.contribution_id.clone(),
        }))
    }
}

/// Encrypt every observation of a stored batch. Observations the encrypter
/// declines are left out.
pub fn encrypt_batch(
    entity: &ObservationStoreEntity,
    encrypter: &dyn Encrypter,
) -> Result<ObservationBatch, EncryptionError> {
    let mut encrypted = Vec::with_capacity(entity.batch.unencrypted_observations.len());
    for observation in &entity.batch.unencrypted_observations {
        if let Some(message) = encrypter.encrypt_observation(observation)? {
            encrypted.push(message);
        }
    }
    Ok(ObservationBatch {
        meta_data: entity.batch.metadata.clone(),
        encrypted_observation: encrypted,
    })
}
