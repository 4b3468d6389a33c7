//! Installation records kept inside a local store.
//!
//! Keys written by the registry:
//!
//! ```text
//! registry/installation     CBOR Installation (current installation)
//! registry/identity         CBOR IdentityBinding (identity + environment)
//! registry/authorization    CBOR Authorization (signed installation text)
//! registry/retired/<id hex> empty marker per revoked installation id
//! ```
//!
//! A registration writes the first three keys in one store transaction, so an
//! installation is either fully registered or absent.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use inboxkit_db::{DbError, StoreHandle};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{signer::SignerKind, AccountIdentity, Environment};

const INSTALLATION_KEY: &str = "registry/installation";
const IDENTITY_KEY: &str = "registry/identity";
const AUTHORIZATION_KEY: &str = "registry/authorization";
const RETIRED_PREFIX: &str = "registry/retired/";

/// Errors from the installation registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The store already holds an installation.
    #[error("store already holds installation {0}")]
    AlreadyRegistered(InstallationId),
    /// The id was used by an earlier installation.
    #[error("installation id {0} is retired")]
    RetiredId(InstallationId),
    /// No installation with this id lives in the store.
    #[error("unknown installation {0}")]
    UnknownInstallation(InstallationId),
    /// A registry record could not be decoded.
    #[error("corrupt registry record {key}: {reason}")]
    Corrupt {
        /// Record key.
        key: String,
        /// Decoder message.
        reason: String,
    },
    /// The underlying store failed.
    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Unique identifier of one installation: 32 random bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstallationId([u8; 32]);

impl InstallationId {
    /// Draws a fresh id from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps raw id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the id as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstallationId({})", self.to_hex())
    }
}

impl FromStr for InstallationId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// One cryptographic client instance bound to an account identity.
///
/// Identity and environment are fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    installation_id: InstallationId,
    identity: AccountIdentity,
    environment: Environment,
    created_at: u64,
    revoked: bool,
}

impl Installation {
    /// Returns the installation id.
    #[must_use]
    pub const fn installation_id(&self) -> &InstallationId {
        &self.installation_id
    }

    /// Returns the owning identity.
    #[must_use]
    pub const fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    /// Returns the environment the installation lives in.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// Registration time, seconds since the Unix epoch.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns `true` once the installation has been revoked.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked
    }
}

/// Signed consent of the account to an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// How `signature` is verified.
    pub signer_kind: SignerKind,
    /// The exact text that was signed.
    pub signed_text: String,
    /// Signature bytes as returned by the signer.
    pub signature: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityBinding {
    identity: AccountIdentity,
    environment: Environment,
}

/// Registers a new installation in `store`.
///
/// The installation record, identity binding and authorization are committed
/// in one transaction.
///
/// # Errors
///
/// * [`RegistryError::AlreadyRegistered`] if the store holds an installation.
/// * [`RegistryError::RetiredId`] if `installation_id` was used before.
/// * [`RegistryError::Storage`] if the commit fails. Nothing is written then.
pub fn register_new(
    store: &mut StoreHandle,
    installation_id: InstallationId,
    identity: &AccountIdentity,
    environment: Environment,
    authorization: &Authorization,
) -> RegistryResult<Installation> {
    let installation = Installation {
        installation_id,
        identity: identity.clone(),
        environment,
        created_at: unix_now(),
        revoked: false,
    };
    let binding = IdentityBinding {
        identity: identity.clone(),
        environment,
    };

    store.with_txn(|txn| {
        if let Some(bytes) = txn.get(INSTALLATION_KEY) {
            let existing: Installation = decode(INSTALLATION_KEY, bytes)?;
            return Err(RegistryError::AlreadyRegistered(existing.installation_id));
        }
        if txn.get(&retired_key(&installation_id)).is_some() {
            return Err(RegistryError::RetiredId(installation_id));
        }
        txn.put(INSTALLATION_KEY, encode(&installation)?);
        txn.put(IDENTITY_KEY, encode(&binding)?);
        txn.put(AUTHORIZATION_KEY, encode(authorization)?);
        Ok(())
    })?;

    log::info!(
        "registered installation {} for {identity} in {environment}",
        installation.installation_id
    );
    Ok(installation)
}

/// Returns the installation held by `store`, whoever it belongs to.
///
/// # Errors
///
/// Returns an error if the record cannot be read or decoded.
pub fn current(store: &StoreHandle) -> RegistryResult<Option<Installation>> {
    store
        .get(INSTALLATION_KEY)?
        .map(|bytes| decode(INSTALLATION_KEY, &bytes))
        .transpose()
}

/// Returns the installation for `identity` in `environment`.
///
/// A record bound to another identity or environment counts as not found.
///
/// # Errors
///
/// Returns an error if a record cannot be read or decoded.
pub fn lookup(
    store: &StoreHandle,
    identity: &AccountIdentity,
    environment: Environment,
) -> RegistryResult<Option<Installation>> {
    let Some(installation) = current(store)? else {
        return Ok(None);
    };
    let Some(bytes) = store.get(IDENTITY_KEY)? else {
        return Ok(None);
    };
    let binding: IdentityBinding = decode(IDENTITY_KEY, &bytes)?;

    let matches = binding.identity == *identity
        && binding.environment == environment
        && installation.identity == *identity
        && installation.environment == environment;
    if !matches {
        log::warn!(
            "store holds installation {} for {} in {}, not {identity} in {environment}",
            installation.installation_id,
            binding.identity,
            binding.environment
        );
        return Ok(None);
    }
    Ok(Some(installation))
}

/// Returns the authorization stored with the current installation.
///
/// # Errors
///
/// Returns an error if the record cannot be read or decoded.
pub fn authorization(store: &StoreHandle) -> RegistryResult<Option<Authorization>> {
    store
        .get(AUTHORIZATION_KEY)?
        .map(|bytes| decode(AUTHORIZATION_KEY, &bytes))
        .transpose()
}

/// Marks `installation_id` revoked and retires the id.
///
/// Revoking an already revoked installation succeeds without writing.
///
/// # Errors
///
/// Returns [`RegistryError::UnknownInstallation`] if the store holds no
/// installation with this id.
pub fn revoke(
    store: &mut StoreHandle,
    installation_id: &InstallationId,
) -> RegistryResult<Installation> {
    let installation = store.with_txn(|txn| {
        let mut installation: Installation = match txn.get(INSTALLATION_KEY) {
            Some(bytes) => decode(INSTALLATION_KEY, bytes)?,
            None => return Err(RegistryError::UnknownInstallation(*installation_id)),
        };
        if installation.installation_id != *installation_id {
            return Err(RegistryError::UnknownInstallation(*installation_id));
        }
        if !installation.revoked {
            installation.revoked = true;
            txn.put(INSTALLATION_KEY, encode(&installation)?);
            txn.put(retired_key(installation_id), Vec::new());
        }
        Ok(installation)
    })?;
    log::info!("revoked installation {installation_id}");
    Ok(installation)
}

/// Returns `true` if `installation_id` has been retired in this store.
///
/// # Errors
///
/// Returns an error if the store is closed.
pub fn is_retired(store: &StoreHandle, installation_id: &InstallationId) -> RegistryResult<bool> {
    Ok(store.contains(&retired_key(installation_id))?)
}

/// Lists every retired installation id in this store.
///
/// # Errors
///
/// Returns an error if the store is closed or a key is malformed.
pub fn retired_ids(store: &StoreHandle) -> RegistryResult<Vec<InstallationId>> {
    store
        .keys_with_prefix(RETIRED_PREFIX)?
        .into_iter()
        .map(|key| {
            key[RETIRED_PREFIX.len()..]
                .parse()
                .map_err(|err: hex::FromHexError| RegistryError::Corrupt {
                    key: key.clone(),
                    reason: err.to_string(),
                })
        })
        .collect()
}

fn retired_key(installation_id: &InstallationId) -> String {
    format!("{RETIRED_PREFIX}{installation_id}")
}

fn encode<T: Serialize>(value: &T) -> RegistryResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|err| RegistryError::Corrupt {
        key: std::any::type_name::<T>().to_string(),
        reason: err.to_string(),
    })?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> RegistryResult<T> {
    ciborium::de::from_reader(bytes).map_err(|err| RegistryError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use inboxkit_db::{EncryptedStore, EncryptionKey, StoreConfig};

    use super::*;

    fn open_store(dir: &std::path::Path) -> StoreHandle {
        EncryptedStore::open(
            &StoreConfig::new(dir.join("store"), "inboxkit:registry-test"),
            &EncryptionKey::from_bytes([3u8; 32]),
        )
        .expect("open store")
    }

    fn identity() -> AccountIdentity {
        AccountIdentity::ethereum_str("0x2222222222222222222222222222222222222222").unwrap()
    }

    fn sample_authorization() -> Authorization {
        Authorization {
            signer_kind: SignerKind::Eoa,
            signed_text: "text".to_string(),
            signature: vec![7; 65],
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let root = tempfile::tempdir().unwrap();
        let mut store = open_store(root.path());
        assert!(lookup(&store, &identity(), Environment::Dev).unwrap().is_none());

        let id = InstallationId::generate();
        let installation = register_new(
            &mut store,
            id,
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        )
        .unwrap();
        assert_eq!(installation.installation_id(), &id);
        assert!(!installation.is_revoked());
        assert!(installation.created_at() > 0);

        assert_eq!(
            lookup(&store, &identity(), Environment::Dev).unwrap(),
            Some(installation.clone())
        );
        assert_eq!(authorization(&store).unwrap(), Some(sample_authorization()));
        // Another environment or identity does not see it.
        assert!(lookup(&store, &identity(), Environment::Production)
            .unwrap()
            .is_none());
        let other = AccountIdentity::passkey("someone-else").unwrap();
        assert!(lookup(&store, &other, Environment::Dev).unwrap().is_none());

        // Survives a reopen.
        drop(store);
        let store = open_store(root.path());
        assert_eq!(current(&store).unwrap(), Some(installation));
    }

    #[test]
    fn test_second_registration_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut store = open_store(root.path());
        let first = InstallationId::generate();
        register_new(
            &mut store,
            first,
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        )
        .unwrap();

        let result = register_new(
            &mut store,
            InstallationId::generate(),
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        );
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(id)) if id == first));
        assert_eq!(
            current(&store).unwrap().unwrap().installation_id(),
            &first
        );
    }

    #[test]
    fn test_revoke_is_idempotent_and_retires_id() {
        let root = tempfile::tempdir().unwrap();
        let mut store = open_store(root.path());
        let id = InstallationId::generate();
        register_new(
            &mut store,
            id,
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        )
        .unwrap();

        let revoked = revoke(&mut store, &id).unwrap();
        assert!(revoked.is_revoked());
        let generation = store.generation().unwrap();

        let again = revoke(&mut store, &id).unwrap();
        assert!(again.is_revoked());
        assert_eq!(store.generation().unwrap(), generation);

        assert!(is_retired(&store, &id).unwrap());
        assert_eq!(retired_ids(&store).unwrap(), vec![id]);
        assert!(lookup(&store, &identity(), Environment::Dev)
            .unwrap()
            .unwrap()
            .is_revoked());
    }

    #[test]
    fn test_revoke_unknown_installation() {
        let root = tempfile::tempdir().unwrap();
        let mut store = open_store(root.path());
        let unknown = InstallationId::generate();
        assert!(matches!(
            revoke(&mut store, &unknown),
            Err(RegistryError::UnknownInstallation(id)) if id == unknown
        ));

        register_new(
            &mut store,
            InstallationId::generate(),
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        )
        .unwrap();
        assert!(matches!(
            revoke(&mut store, &unknown),
            Err(RegistryError::UnknownInstallation(_))
        ));
    }

    #[test]
    fn test_retired_id_cannot_be_registered() {
        let root = tempfile::tempdir().unwrap();
        let mut store = open_store(root.path());
        let id = InstallationId::generate();
        store
            .with_txn(|txn| {
                txn.put(retired_key(&id), Vec::new());
                Ok::<_, DbError>(())
            })
            .unwrap();

        let result = register_new(
            &mut store,
            id,
            &identity(),
            Environment::Dev,
            &sample_authorization(),
        );
        assert!(matches!(result, Err(RegistryError::RetiredId(_))));
        assert!(current(&store).unwrap().is_none());
    }

    #[test]
    fn test_installation_id_hex() {
        let id = InstallationId::from_bytes([0x0f; 32]);
        assert_eq!(id.to_string(), "0f".repeat(32));
        assert_eq!(id.to_string().parse::<InstallationId>().unwrap(), id);
        assert_eq!(
            format!("0x{id}").parse::<InstallationId>().unwrap(),
            id
        );
        assert!("abcd".parse::<InstallationId>().is_err());
        assert_ne!(InstallationId::generate(), InstallationId::generate());
    }
}
