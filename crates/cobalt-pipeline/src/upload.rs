//! Delivery of encrypted envelopes.

use std::path::PathBuf;

use async_trait::async_trait;
use cobalt_core::wire::EncryptedMessage;
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, message: EncryptedMessage) -> Result<(), UploadError>;

    /// Signals that a periodic run has handed over everything it had.
    async fn upload_done(&self);
}

/// Writes every message into an outbox directory, one file per message.
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl Uploader for DirectoryUploader {
    async fn upload(&self, message: EncryptedMessage) -> Result<(), UploadError> {
        let bytes = message.encode_to_vec();
        let digest = hex::encode(Sha256::digest(&bytes));
        let path = self.dir.join(format!("{}.pb", &digest[..16]));

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "envelope written to outbox");
        Ok(())
    }

    async fn upload_done(&self) {
        debug!(dir = %self.dir.display(), "upload run complete");
    }
}
