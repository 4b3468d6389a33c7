//! Environment selection and per-identity namespaces.
//!
//! Every `(identity, environment)` pair resolves to its own store directory:
//!
//! ```text
//! <db_directory>/<environment>/<sha256("<kind>:<identifier>") hex>/
//! ```
//!
//! An explicit API override replaces the remote endpoint only. The store path
//! always follows the logical environment, so identities and message history
//! never cross environments.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use url::Url;

use crate::{error::ClientError, AccountIdentity, ClientOptions, ClientResult};

const DB_DIRECTORY_NAME: &str = "inboxkit";

/// Logical network a client talks to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// A node running on the developer's machine.
    Local,
    /// The shared development network.
    #[default]
    Dev,
    /// The production network.
    Production,
}

impl Environment {
    /// All environments, in declaration order.
    pub const ALL: [Self; 3] = [Self::Local, Self::Dev, Self::Production];

    /// Returns the default remote API endpoint.
    #[must_use]
    pub const fn default_api_url(self) -> &'static str {
        match self {
            Self::Local => "http://localhost:5556",
            Self::Dev => "https://grpc.dev.xmtp.network:443",
            Self::Production => "https://grpc.production.xmtp.network:443",
        }
    }

    /// Returns the built-in history sync endpoint.
    #[must_use]
    pub const fn default_history_sync_url(self) -> &'static str {
        match self {
            Self::Local => "http://localhost:5558",
            Self::Dev => "https://message-history.dev.ephemera.network",
            Self::Production => "https://message-history.production.ephemera.network",
        }
    }
}

/// Remote API selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ApiEndpoint {
    /// Use the environment's default endpoint.
    #[default]
    Default,
    /// Use this endpoint regardless of the environment.
    Override(Url),
}

impl ApiEndpoint {
    /// Parses an override endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] if `url` is not an absolute URL.
    pub fn parse(url: &str) -> ClientResult<Self> {
        parse_url("api_url", url).map(Self::Override)
    }
}

/// Sandboxed files directory handed over by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    files_dir: PathBuf,
}

impl AppContext {
    /// Wraps the application's private files directory.
    #[must_use]
    pub fn new(files_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: files_dir.into(),
        }
    }

    /// Returns the application's files directory.
    #[must_use]
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }
}

/// Default history sync endpoint per environment.
///
/// Set once when the [`EnvironmentResolver`] is built. Tests inject their own
/// table instead of mutating shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySyncDefaults {
    local: String,
    dev: String,
    production: String,
}

impl HistorySyncDefaults {
    /// The endpoints shipped with the library.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            local: Environment::Local.default_history_sync_url().to_string(),
            dev: Environment::Dev.default_history_sync_url().to_string(),
            production: Environment::Production
                .default_history_sync_url()
                .to_string(),
        }
    }

    /// Replaces the endpoint for one environment.
    #[must_use]
    pub fn with(mut self, environment: Environment, url: impl Into<String>) -> Self {
        *self.slot(environment) = url.into();
        self
    }

    /// Returns the endpoint configured for `environment`.
    #[must_use]
    pub fn get(&self, environment: Environment) -> &str {
        match environment {
            Environment::Local => &self.local,
            Environment::Dev => &self.dev,
            Environment::Production => &self.production,
        }
    }

    fn slot(&mut self, environment: Environment) -> &mut String {
        match environment {
            Environment::Local => &mut self.local,
            Environment::Dev => &mut self.dev,
            Environment::Production => &mut self.production,
        }
    }
}

impl Default for HistorySyncDefaults {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Isolated context for one identity in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Logical environment.
    pub environment: Environment,
    /// Directory of the encrypted store.
    pub store_path: PathBuf,
    /// Remote API endpoint.
    pub remote_endpoint: Url,
    /// History sync service endpoint.
    pub history_sync_endpoint: Url,
    label: String,
}

impl Namespace {
    /// Label the store contents are cryptographically bound to.
    #[must_use]
    pub fn store_label(&self) -> &str {
        &self.label
    }
}

/// Maps client options and an identity to a [`Namespace`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    history_sync: HistorySyncDefaults,
}

impl EnvironmentResolver {
    /// Creates a resolver with the given history sync table.
    #[must_use]
    pub const fn new(history_sync: HistorySyncDefaults) -> Self {
        Self { history_sync }
    }

    /// Returns the history sync table.
    #[must_use]
    pub const fn history_sync_defaults(&self) -> &HistorySyncDefaults {
        &self.history_sync
    }

    /// Resolves the namespace for `identity` under `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] if a configured endpoint is not
    /// a valid URL.
    pub fn resolve(
        &self,
        identity: &AccountIdentity,
        options: &ClientOptions,
    ) -> ClientResult<Namespace> {
        let environment = options.env;

        let remote_endpoint = match &options.api_url {
            ApiEndpoint::Override(url) => url.clone(),
            ApiEndpoint::Default => parse_url("api_url", environment.default_api_url())?,
        };
        let history_sync_endpoint = match &options.history_sync_url {
            Some(url) => url.clone(),
            None => parse_url("history_sync_url", self.history_sync.get(environment))?,
        };

        let db_directory = options
            .db_directory
            .clone()
            .or_else(|| {
                options
                    .app_context
                    .as_ref()
                    .map(|context| context.files_dir().join(DB_DIRECTORY_NAME))
            })
            .unwrap_or_else(default_db_directory);

        let store_path = db_directory
            .join(environment.as_ref())
            .join(identity.storage_key());

        Ok(Namespace {
            environment,
            store_path,
            remote_endpoint,
            history_sync_endpoint,
            label: format!("inboxkit:{environment}:{identity}"),
        })
    }
}

/// Returns `<platform data dir>/inboxkit`, or `./inboxkit` when the platform
/// has no data directory.
#[must_use]
pub fn default_db_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DB_DIRECTORY_NAME)
}

fn parse_url(attribute: &str, url: &str) -> ClientResult<Url> {
    Url::parse(url).map_err(|err| ClientError::invalid_input(attribute, err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn identity() -> AccountIdentity {
        AccountIdentity::ethereum_str("0x1111111111111111111111111111111111111111")
            .expect("identity")
    }

    fn options(env: Environment) -> ClientOptions {
        ClientOptions::default()
            .with_env(env)
            .with_db_directory("/data/inboxkit")
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("dev").unwrap(), Environment::Dev);
        assert_eq!(
            Environment::from_str("PRODUCTION").unwrap(),
            Environment::Production
        );
        assert_eq!(Environment::from_str("local").unwrap(), Environment::Local);
        assert!(Environment::from_str("staging").is_err());
        assert_eq!(Environment::default(), Environment::Dev);
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    fn test_environments_have_disjoint_store_paths() {
        let resolver = EnvironmentResolver::default();
        let paths: Vec<PathBuf> = Environment::ALL
            .iter()
            .map(|env| {
                resolver
                    .resolve(&identity(), &options(*env))
                    .expect("resolve")
                    .store_path
            })
            .collect();

        assert_eq!(
            paths[1],
            PathBuf::from("/data/inboxkit/dev").join(identity().storage_key())
        );
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
    }

    #[test]
    fn test_api_override_keeps_environment_store_path() {
        let resolver = EnvironmentResolver::default();
        let default = resolver
            .resolve(&identity(), &options(Environment::Production))
            .expect("resolve");
        let overridden = resolver
            .resolve(
                &identity(),
                &options(Environment::Production)
                    .with_api_url(ApiEndpoint::parse("https://node.example.com:443").unwrap()),
            )
            .expect("resolve");

        assert_eq!(
            default.remote_endpoint.as_str(),
            "https://grpc.production.xmtp.network/"
        );
        assert_eq!(
            overridden.remote_endpoint.as_str(),
            "https://node.example.com/"
        );
        assert_eq!(default.store_path, overridden.store_path);
        assert_eq!(default.store_label(), overridden.store_label());
    }

    #[test]
    fn test_history_sync_defaults_per_environment() {
        let resolver = EnvironmentResolver::default();
        let dev = resolver
            .resolve(&identity(), &options(Environment::Dev))
            .expect("resolve");
        let prod = resolver
            .resolve(&identity(), &options(Environment::Production))
            .expect("resolve");
        assert_eq!(
            dev.history_sync_endpoint.as_str(),
            "https://message-history.dev.ephemera.network/"
        );
        assert_eq!(
            prod.history_sync_endpoint.as_str(),
            "https://message-history.production.ephemera.network/"
        );
    }

    #[test]
    fn test_injected_history_sync_defaults_and_override() {
        let resolver = EnvironmentResolver::new(
            HistorySyncDefaults::builtin().with(Environment::Dev, "http://sync.test:9000"),
        );
        let namespace = resolver
            .resolve(&identity(), &options(Environment::Dev))
            .expect("resolve");
        assert_eq!(namespace.history_sync_endpoint.as_str(), "http://sync.test:9000/");

        let explicit = Url::parse("https://sync.example.com").unwrap();
        let namespace = resolver
            .resolve(
                &identity(),
                &options(Environment::Dev).with_history_sync_url(explicit.clone()),
            )
            .expect("resolve");
        assert_eq!(namespace.history_sync_endpoint, explicit);

        // The builtin resolver is unaffected.
        let builtin = EnvironmentResolver::default()
            .resolve(&identity(), &options(Environment::Dev))
            .expect("resolve");
        assert_ne!(builtin.history_sync_endpoint.as_str(), "http://sync.test:9000/");
    }

    #[test]
    fn test_invalid_injected_endpoint() {
        let resolver = EnvironmentResolver::new(
            HistorySyncDefaults::builtin().with(Environment::Local, "not a url"),
        );
        let result = resolver.resolve(&identity(), &options(Environment::Local));
        assert!(matches!(
            result,
            Err(ClientError::InvalidInput { attribute, .. }) if attribute == "history_sync_url"
        ));
        assert!(ApiEndpoint::parse("localhost").is_err());
    }

    #[test]
    fn test_app_context_directory() {
        let options = ClientOptions::default().with_app_context(AppContext::new("/sandbox/files"));
        let namespace = EnvironmentResolver::default()
            .resolve(&identity(), &options)
            .expect("resolve");
        assert!(namespace
            .store_path
            .starts_with("/sandbox/files/inboxkit/dev"));

        let explicit = options.with_db_directory("/explicit");
        let namespace = EnvironmentResolver::default()
            .resolve(&identity(), &explicit)
            .expect("resolve");
        assert!(namespace.store_path.starts_with("/explicit/dev"));
    }

    #[test]
    fn test_default_db_directory() {
        assert!(default_db_directory().ends_with("inboxkit"));
    }
}
