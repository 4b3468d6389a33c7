//! Client lifecycle: create, build, logout.
//!
//! ```text
//! Uninitialized --create--> Creating --> Ready
//! Uninitialized --build---> Building --> Ready
//! Ready --logout(false)--> LoggedOut
//! Ready --logout(true)---> LoggedOutDeleted
//! ```
//!
//! For one installation the store is opened before the registry is read or
//! written, and the registry write is committed before any network call and
//! before the client is returned.

use std::fmt;

use inboxkit_db::{EncryptedStore, EncryptionKey, OpenState, StoreConfig, StoreHandle};
use strum::Display;

use crate::{
    registry::{self, Authorization, Installation, InstallationId},
    signer::{sign_with_timeout, signature_text, Signer},
    AccountIdentity, ClientError, ClientOptions, ClientResult, Environment, EnvironmentResolver,
    IdentityNetwork, Namespace, NetworkError, OfflineNetwork,
};
use crate::network::bounded;

/// Position of a client in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecycleState {
    /// No call has been made yet.
    Uninitialized,
    /// `create` is opening the store or registering an installation.
    Creating,
    /// `build` is resuming an existing installation.
    Building,
    /// The client holds its store and a registered installation.
    Ready,
    /// Logged out; the local store is kept.
    LoggedOut,
    /// Logged out; the local store has been erased.
    LoggedOutDeleted,
}

fn transition(identity: &AccountIdentity, from: LifecycleState, to: LifecycleState) {
    log::debug!("client {identity}: {from} -> {to}");
}

/// Live client for one installation.
///
/// Owns the open local store. Only one client per identity and environment can
/// exist on a device at a time; moving the client moves that ownership.
pub struct Client {
    store: StoreHandle,
    installation: Installation,
    namespace: Namespace,
    new_installation: bool,
    network_error: Option<NetworkError>,
}

impl Client {
    /// Returns the installation this client runs as.
    #[must_use]
    pub const fn installation(&self) -> &Installation {
        &self.installation
    }

    /// Returns the installation id.
    #[must_use]
    pub const fn installation_id(&self) -> &InstallationId {
        self.installation.installation_id()
    }

    /// Returns the account identity.
    #[must_use]
    pub const fn identity(&self) -> &AccountIdentity {
        self.installation.identity()
    }

    /// Returns the environment.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.installation.environment()
    }

    /// Returns the resolved namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Always [`LifecycleState::Ready`]: a client only exists while ready.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        LifecycleState::Ready
    }

    /// Returns `true` if this call registered the installation.
    #[must_use]
    pub const fn is_new_installation(&self) -> bool {
        self.new_installation
    }

    /// Returns the network failure from the create or build call, if any.
    ///
    /// Local state is consistent regardless.
    #[must_use]
    pub const fn network_error(&self) -> Option<&NetworkError> {
        self.network_error.as_ref()
    }

    /// Returns the signed authorization stored for this installation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn authorization(&self) -> ClientResult<Option<Authorization>> {
        Ok(registry::authorization(&self.store)?)
    }

    /// Revokes this client's own installation.
    ///
    /// The client stays usable for logout, but later `create` or `build` calls
    /// for this store fail with [`ClientError::RevokedInstallation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn revoke_installation(&mut self) -> ClientResult<()> {
        let id = *self.installation.installation_id();
        self.installation = registry::revoke(&mut self.store, &id)?;
        Ok(())
    }

    /// Closes the client, optionally erasing its local store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PartialDeletion`] if erasing stopped half way;
    /// finish with [`ClientManager::retry_deletion`].
    pub fn logout(self, delete_local_data: bool) -> ClientResult<LifecycleState> {
        let Self {
            mut store,
            installation,
            ..
        } = self;
        let identity = installation.identity();

        let next = if delete_local_data {
            store.delete()?;
            LifecycleState::LoggedOutDeleted
        } else {
            store.close()?;
            LifecycleState::LoggedOut
        };
        transition(identity, LifecycleState::Ready, next);
        Ok(next)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("installation", &self.installation)
            .field("store_path", &self.namespace.store_path)
            .field("new_installation", &self.new_installation)
            .field("network_error", &self.network_error)
            .finish_non_exhaustive()
    }
}

/// Entry point for client lifecycle calls.
///
/// Holds the environment resolver and the network collaborator. Cheap to share
/// by reference across tasks; every call opens its own store.
#[derive(Debug, Default)]
pub struct ClientManager<N: IdentityNetwork = OfflineNetwork> {
    resolver: EnvironmentResolver,
    network: N,
}

impl ClientManager<OfflineNetwork> {
    /// Manager with built-in history sync defaults and no network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<N: IdentityNetwork> ClientManager<N> {
    /// Manager with an explicit resolver and network collaborator.
    #[must_use]
    pub const fn with_network(resolver: EnvironmentResolver, network: N) -> Self {
        Self { resolver, network }
    }

    /// Returns the environment resolver.
    #[must_use]
    pub const fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    /// Returns the network collaborator.
    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Resolves the namespace `identity` would use under `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] for an invalid endpoint.
    pub fn namespace(
        &self,
        identity: &AccountIdentity,
        options: &ClientOptions,
    ) -> ClientResult<Namespace> {
        self.resolver.resolve(identity, options)
    }

    /// Creates a client for the signer's identity, registering a new
    /// installation unless the local store already holds one.
    ///
    /// Signing happens only for a new installation and is bounded by
    /// [`ClientOptions::signing_timeout`]. Dropping the returned future cancels
    /// the call; a store left without an installation is completed by the
    /// next `create`. Each network call is bounded by
    /// [`ClientOptions::network_timeout`]; a timeout is reported through
    /// [`Client::network_error`] like any other network failure.
    ///
    /// # Errors
    ///
    /// * [`ClientError::Signing`] if the signer fails or times out. No
    ///   installation is persisted and a store created by this call is removed.
    /// * [`ClientError::RevokedInstallation`] if the resident installation is
    ///   revoked.
    /// * [`ClientError::Decryption`] if `key` does not match the local store.
    /// * [`ClientError::AlreadyOpen`] if another client holds the store.
    pub async fn create<S: Signer>(
        &self,
        signer: &S,
        key: &EncryptionKey,
        options: &ClientOptions,
    ) -> ClientResult<Client> {
        let identity = signer.identity();
        let namespace = self.resolver.resolve(&identity, options)?;
        transition(&identity, LifecycleState::Uninitialized, LifecycleState::Creating);

        let mut store = open_store(&namespace, key)?;
        let created = store.open_state() == OpenState::Created;

        if let Some(installation) = resident_installation(&store, &identity, &namespace)? {
            log::info!(
                "reusing installation {} for {identity}",
                installation.installation_id()
            );
            return self
                .resume(
                    LifecycleState::Creating,
                    store,
                    installation,
                    namespace,
                    options,
                )
                .await;
        }
        if !created {
            log::info!("completing interrupted create for {identity}");
        }

        let installation_id = InstallationId::generate();
        let text = signature_text(&identity, namespace.environment, &installation_id);
        let signature =
            match sign_with_timeout(signer, text.as_bytes(), options.signing_timeout).await {
                Ok(signature) => signature,
                Err(err) => {
                    log::warn!("signing failed for {identity}: {err}");
                    if created {
                        discard(store);
                    }
                    return Err(err.into());
                }
            };
        let authorization = Authorization {
            signer_kind: signer.kind(),
            signed_text: text,
            signature,
        };

        let installation = registry::register_new(
            &mut store,
            installation_id,
            &identity,
            namespace.environment,
            &authorization,
        )?;

        let mut network_error = bounded(
            options.network_timeout,
            self.network
                .register_installation(&namespace, &installation, &authorization),
        )
        .await;
        if network_error.is_none() && options.history_sync {
            network_error = bounded(
                options.network_timeout,
                self.network
                    .request_history_sync(&namespace.history_sync_endpoint, &installation),
            )
            .await;
        }
        if let Some(err) = &network_error {
            log::warn!(
                "installation {} registered locally, network step failed: {err}",
                installation.installation_id()
            );
        }

        transition(&identity, LifecycleState::Creating, LifecycleState::Ready);
        Ok(Client {
            store,
            installation,
            namespace,
            new_installation: true,
            network_error,
        })
    }

    /// Resumes the installation stored for `identity`. Never signs and never
    /// creates a store.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NotFound`] if no local store or installation exists.
    /// * [`ClientError::RevokedInstallation`] if the installation is revoked.
    /// * [`ClientError::Decryption`] if `key` does not match the local store.
    /// * [`ClientError::AlreadyOpen`] if another client holds the store.
    pub async fn build(
        &self,
        identity: &AccountIdentity,
        key: &EncryptionKey,
        options: &ClientOptions,
    ) -> ClientResult<Client> {
        let namespace = self.resolver.resolve(identity, options)?;
        transition(identity, LifecycleState::Uninitialized, LifecycleState::Building);

        let not_found = || ClientError::NotFound {
            identity: identity.clone(),
            environment: namespace.environment,
        };
        if !EncryptedStore::exists(&namespace.store_path) {
            return Err(not_found());
        }

        let store = open_store(&namespace, key)?;
        if store.open_state() == OpenState::Created {
            // Removed between the existence check and the open.
            discard(store);
            return Err(not_found());
        }
        let Some(installation) = resident_installation(&store, identity, &namespace)? else {
            return Err(not_found());
        };
        self.resume(
            LifecycleState::Building,
            store,
            installation,
            namespace,
            options,
        )
        .await
    }

    /// Closes `client`, optionally erasing its local store.
    ///
    /// # Errors
    ///
    /// See [`Client::logout`].
    pub fn logout(&self, client: Client, delete_local_data: bool) -> ClientResult<LifecycleState> {
        client.logout(delete_local_data)
    }

    /// Erases the local store for `identity` without building a client.
    ///
    /// Finishes a deletion that stopped with [`ClientError::PartialDeletion`],
    /// and is also how a store that cannot be built is removed: one holding a
    /// revoked installation, or one left without an installation. The key is
    /// not checked. Succeeds without doing anything if there is no local store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyOpen`] if a client holds the store, or
    /// [`ClientError::PartialDeletion`] if erasing fails again.
    pub fn retry_deletion(
        &self,
        identity: &AccountIdentity,
        options: &ClientOptions,
    ) -> ClientResult<()> {
        let namespace = self.resolver.resolve(identity, options)?;
        EncryptedStore::purge(&namespace.store_path)?;
        log::info!("local store for {identity} in {} erased", namespace.environment);
        Ok(())
    }

    /// Revokes the installation stored for `identity` without building a
    /// client.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NotFound`] if there is no local installation.
    /// * [`ClientError::Decryption`] if `key` does not match the local store.
    /// * [`ClientError::AlreadyOpen`] if a client holds the store.
    pub fn revoke_installation(
        &self,
        identity: &AccountIdentity,
        key: &EncryptionKey,
        options: &ClientOptions,
    ) -> ClientResult<Installation> {
        let namespace = self.resolver.resolve(identity, options)?;
        let not_found = || ClientError::NotFound {
            identity: identity.clone(),
            environment: namespace.environment,
        };
        if !EncryptedStore::exists(&namespace.store_path) {
            return Err(not_found());
        }

        let mut store = open_store(&namespace, key)?;
        if store.open_state() == OpenState::Created {
            discard(store);
            return Err(not_found());
        }
        let Some(installation) = registry::lookup(&store, identity, namespace.environment)? else {
            return Err(not_found());
        };
        let revoked = registry::revoke(&mut store, installation.installation_id())?;
        store.close()?;
        Ok(revoked)
    }

    async fn resume(
        &self,
        from: LifecycleState,
        store: StoreHandle,
        installation: Installation,
        namespace: Namespace,
        options: &ClientOptions,
    ) -> ClientResult<Client> {
        if installation.is_revoked() {
            return Err(ClientError::RevokedInstallation {
                installation_id: *installation.installation_id(),
            });
        }

        let network_error = bounded(
            options.network_timeout,
            self.network.validate_installation(&namespace, &installation),
        )
        .await;
        if let Some(err) = &network_error {
            log::warn!(
                "installation {} resumed, validation failed: {err}",
                installation.installation_id()
            );
        }

        transition(installation.identity(), from, LifecycleState::Ready);
        Ok(Client {
            store,
            installation,
            namespace,
            new_installation: false,
            network_error,
        })
    }
}

fn open_store(namespace: &Namespace, key: &EncryptionKey) -> ClientResult<StoreHandle> {
    let config = StoreConfig::new(&namespace.store_path, namespace.store_label());
    Ok(EncryptedStore::open(&config, key)?)
}

/// Returns the store's installation if it belongs to `identity`.
///
/// An installation recorded for anyone else means the store is not this
/// identity's: [`ClientError::NotFound`].
fn resident_installation(
    store: &StoreHandle,
    identity: &AccountIdentity,
    namespace: &Namespace,
) -> ClientResult<Option<Installation>> {
    if registry::current(store)?.is_none() {
        return Ok(None);
    }
    match registry::lookup(store, identity, namespace.environment)? {
        Some(installation) => Ok(Some(installation)),
        None => Err(ClientError::NotFound {
            identity: identity.clone(),
            environment: namespace.environment,
        }),
    }
}

/// Removes a store this call created and never registered.
fn discard(store: StoreHandle) {
    let path = store.path().to_path_buf();
    if let Err(err) = store.delete() {
        log::warn!("failed to remove unregistered store {}: {err}", path.display());
    }
}
