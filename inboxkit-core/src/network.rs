use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::registry::{Authorization, Installation};
use crate::Namespace;

/// Failure reported by the network collaborator.
///
/// Never fatal to local state: the client is returned and the error is
/// available through [`Client::network_error`](crate::Client::network_error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The remote endpoint could not be reached.
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint that was called.
        endpoint: String,
        /// Transport failure.
        reason: String,
    },
    /// The network refused the identity or installation.
    #[error("identity verification failed: {0}")]
    Verification(String),
    /// The history sync service refused the request.
    #[error("history sync request failed: {0}")]
    HistorySync(String),
    /// The call did not complete within the configured timeout.
    #[error("network call timed out after {0:?}")]
    Timeout(Duration),
}

/// Awaits one collaborator call, giving up after `timeout`.
///
/// Returns the failure, if any, for [`Client::network_error`](crate::Client::network_error).
pub(crate) async fn bounded<F>(timeout: Duration, call: F) -> Option<NetworkError>
where
    F: Future<Output = Result<(), NetworkError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.err(),
        Err(_) => Some(NetworkError::Timeout(timeout)),
    }
}

/// Remote identity and history sync operations used during create and build.
///
/// The protocol behind these calls is not part of this crate.
pub trait IdentityNetwork: Send + Sync {
    /// Publishes a newly registered installation and its authorization.
    fn register_installation(
        &self,
        namespace: &Namespace,
        installation: &Installation,
        authorization: &Authorization,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Checks a resumed installation against the network.
    fn validate_installation(
        &self,
        namespace: &Namespace,
        installation: &Installation,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Asks the history sync service to deliver prior messages to a new
    /// installation.
    fn request_history_sync(
        &self,
        endpoint: &Url,
        installation: &Installation,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

/// Network that accepts everything without leaving the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl IdentityNetwork for OfflineNetwork {
    async fn register_installation(
        &self,
        namespace: &Namespace,
        installation: &Installation,
        _authorization: &Authorization,
    ) -> Result<(), NetworkError> {
        log::debug!(
            "offline: skipping registration of {} at {}",
            installation.installation_id(),
            namespace.remote_endpoint
        );
        Ok(())
    }

    async fn validate_installation(
        &self,
        _namespace: &Namespace,
        _installation: &Installation,
    ) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn request_history_sync(
        &self,
        endpoint: &Url,
        installation: &Installation,
    ) -> Result<(), NetworkError> {
        log::debug!(
            "offline: skipping history sync for {} via {endpoint}",
            installation.installation_id()
        );
        Ok(())
    }
}
