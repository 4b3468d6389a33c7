use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{registry::InstallationId, AccountIdentity, Environment};

/// Failure of the external signing capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// The wallet or user declined to sign.
    #[error("signer rejected the request: {0}")]
    Rejected(String),
    /// The wallet could not be reached.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    /// No signature arrived within the configured timeout.
    #[error("signing timed out after {0:?}")]
    Timeout(Duration),
}

/// How signatures from a signer are verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerKind {
    /// An externally owned account; signatures recover to the address.
    #[default]
    Eoa,
    /// A smart-contract wallet; signatures are checked by the contract on
    /// `chain_id`, optionally pinned to `block_number`.
    SmartContract {
        /// Chain the wallet contract lives on.
        chain_id: u64,
        /// Block to verify against, latest if `None`.
        block_number: Option<u64>,
    },
}

/// External signing capability for one account identity.
///
/// `sign_message` may wait on user interaction in a wallet. Callers bound it
/// with a timeout and may drop the future to cancel.
pub trait Signer: Send + Sync {
    /// Returns the account this signer controls.
    fn identity(&self) -> AccountIdentity;

    /// Returns how this signer's signatures are verified.
    fn kind(&self) -> SignerKind {
        SignerKind::Eoa
    }

    /// Signs `message`.
    fn sign_message(
        &self,
        message: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, SignerError>> + Send;
}

/// Text a signer signs to authorize a new installation.
///
/// Deterministic for a given identity, environment and installation id.
#[must_use]
pub fn signature_text(
    identity: &AccountIdentity,
    environment: Environment,
    installation_id: &InstallationId,
) -> String {
    format!(
        "inboxkit installation authorization\n\
         \n\
         Identity: {identity}\n\
         Environment: {environment}\n\
         Installation: {installation_id}\n\
         \n\
         Signing this message lets the installation above read and send messages for this account."
    )
}

pub(crate) async fn sign_with_timeout<S: Signer>(
    signer: &S,
    message: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, SignerError> {
    let signature = tokio::time::timeout(timeout, signer.sign_message(message))
        .await
        .map_err(|_| SignerError::Timeout(timeout))??;
    if signature.is_empty() {
        return Err(SignerError::Rejected("empty signature".to_string()));
    }
    Ok(signature)
}
