use std::path::PathBuf;

use inboxkit_db::DbError;
use thiserror::Error;

use crate::{
    network::NetworkError, registry::InstallationId, registry::RegistryError,
    signer::SignerError, AccountIdentity, Environment,
};

/// Result type for client lifecycle operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error outputs from client lifecycle calls.
///
/// Every lifecycle call either returns a fully valid client or exactly one of
/// these errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The signer was unavailable, rejected the request or timed out.
    #[error("signing_error: {0}")]
    Signing(#[from] SignerError),
    /// The encryption key does not match the local store, or the store was
    /// modified on disk.
    #[error("decryption_error: the encryption key cannot read the local store")]
    Decryption,
    /// Another live client holds the local store.
    #[error("already_open: local store at {} is held by another client", path.display())]
    AlreadyOpen {
        /// Store directory.
        path: PathBuf,
    },
    /// No local store or installation exists for the identity on this device.
    #[error("not_found: no local installation for {identity} in {environment}")]
    NotFound {
        /// Identity that was looked up.
        identity: AccountIdentity,
        /// Environment that was looked up.
        environment: Environment,
    },
    /// The resident installation has been revoked.
    #[error("revoked_installation: installation {installation_id} is revoked")]
    RevokedInstallation {
        /// Revoked installation.
        installation_id: InstallationId,
    },
    /// Deleting local data stopped half way. Retry with
    /// [`ClientManager::retry_deletion`](crate::ClientManager::retry_deletion).
    #[error("partial_deletion: local store at {} was not fully deleted: {reason}", path.display())]
    PartialDeletion {
        /// Store directory.
        path: PathBuf,
        /// What stopped the deletion.
        reason: String,
    },
    /// The network collaborator failed.
    #[error("network_error: {0}")]
    Network(#[from] NetworkError),
    /// The presented input is not valid for the requested operation.
    #[error("invalid_input: {attribute}: {reason}")]
    InvalidInput {
        /// Offending input.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Any other local storage failure.
    #[error("storage_error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Returns `true` if the same call may succeed later without the caller
    /// changing its input.
    ///
    /// Nothing in this crate retries automatically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpen { .. } | Self::PartialDeletion { .. } | Self::Network(_)
        )
    }

    pub(crate) fn invalid_input(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

impl From<DbError> for ClientError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Decryption(_) => Self::Decryption,
            DbError::AlreadyOpen { path } => Self::AlreadyOpen { path },
            DbError::PartialDeletion { path, reason } => Self::PartialDeletion { path, reason },
            DbError::InvalidKeyLength(len) => {
                Self::invalid_input("encryption_key", format!("expected 32 bytes, got {len}"))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<RegistryError> for ClientError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Storage(db) => db.into(),
            RegistryError::UnknownInstallation(id) => {
                Self::invalid_input("installation_id", format!("unknown installation {id}"))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
