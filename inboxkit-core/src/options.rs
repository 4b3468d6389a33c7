use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::{ApiEndpoint, AppContext, Environment};

/// Default bound on a signer round trip.
pub const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on each network collaborator call.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Options recognized by client lifecycle calls.
///
/// The database encryption key is not an option: it is passed to every call
/// that opens the store and never kept here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Logical network, `Dev` by default.
    pub env: Environment,
    /// Remote API endpoint override.
    pub api_url: ApiEndpoint,
    /// Root directory for local stores. See
    /// [`default_db_directory`](crate::default_db_directory) when unset.
    pub db_directory: Option<PathBuf>,
    /// History sync endpoint override.
    pub history_sync_url: Option<Url>,
    /// Whether new installations request history sync.
    pub history_sync: bool,
    /// Sandboxed files directory on platforms that require one.
    pub app_context: Option<AppContext>,
    /// Bound on waiting for the signer.
    pub signing_timeout: Duration,
    /// Bound on each network call made during create and build.
    pub network_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            env: Environment::default(),
            api_url: ApiEndpoint::Default,
            db_directory: None,
            history_sync_url: None,
            history_sync: true,
            app_context: None,
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }
}

impl ClientOptions {
    /// Selects the environment.
    #[must_use]
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Overrides the remote API endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: ApiEndpoint) -> Self {
        self.api_url = api_url;
        self
    }

    /// Sets the root directory for local stores.
    #[must_use]
    pub fn with_db_directory(mut self, db_directory: impl Into<PathBuf>) -> Self {
        self.db_directory = Some(db_directory.into());
        self
    }

    /// Overrides the history sync endpoint.
    #[must_use]
    pub fn with_history_sync_url(mut self, url: Url) -> Self {
        self.history_sync_url = Some(url);
        self
    }

    /// Enables or disables history sync for new installations.
    #[must_use]
    pub fn with_history_sync(mut self, enabled: bool) -> Self {
        self.history_sync = enabled;
        self
    }

    /// Supplies the application's sandboxed files directory.
    #[must_use]
    pub fn with_app_context(mut self, app_context: AppContext) -> Self {
        self.app_context = Some(app_context);
        self
    }

    /// Sets the signing timeout.
    #[must_use]
    pub fn with_signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    /// Sets the bound on each network call.
    #[must_use]
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.env, Environment::Dev);
        assert_eq!(options.api_url, ApiEndpoint::Default);
        assert!(options.history_sync);
        assert!(options.db_directory.is_none());
        assert_eq!(options.signing_timeout, Duration::from_secs(60));
        assert_eq!(options.network_timeout, Duration::from_secs(30));
    }
}
