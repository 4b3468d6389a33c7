use std::fmt;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

use crate::{error::ClientError, ClientResult};

/// Kind of account an identity names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// An Ethereum account, externally owned or smart contract.
    Ethereum,
    /// A passkey credential.
    Passkey,
}

/// Externally verifiable account a user controls through a signer.
///
/// Ethereum identifiers are normalized to lowercase `0x`-prefixed hex, so
/// checksummed and lowercase spellings of one address are the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountIdentity {
    kind: IdentityKind,
    identifier: String,
}

impl AccountIdentity {
    /// Validates and normalizes an identifier of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] for a malformed Ethereum address
    /// or an empty passkey identifier.
    pub fn new(kind: IdentityKind, identifier: &str) -> ClientResult<Self> {
        match kind {
            IdentityKind::Ethereum => Self::ethereum_str(identifier),
            IdentityKind::Passkey => Self::passkey(identifier),
        }
    }

    /// Identity for an Ethereum address.
    #[must_use]
    pub fn ethereum(address: Address) -> Self {
        Self {
            kind: IdentityKind::Ethereum,
            identifier: format!("0x{}", hex::encode(address.as_slice())),
        }
    }

    /// Parses a hex Ethereum address, with or without `0x`, in any case.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] if `address` is not 20 bytes of hex.
    pub fn ethereum_str(address: &str) -> ClientResult<Self> {
        let parsed: Address = address
            .trim()
            .parse()
            .map_err(|err| ClientError::invalid_input("identity", format!("{err}")))?;
        Ok(Self::ethereum(parsed))
    }

    /// Identity for a passkey credential id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInput`] if `credential_id` is blank.
    pub fn passkey(credential_id: &str) -> ClientResult<Self> {
        let credential_id = credential_id.trim();
        if credential_id.is_empty() {
            return Err(ClientError::invalid_input(
                "identity",
                "passkey identifier is empty",
            ));
        }
        Ok(Self {
            kind: IdentityKind::Passkey,
            identifier: credential_id.to_string(),
        })
    }

    /// Returns the identity kind.
    #[must_use]
    pub const fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// Returns the normalized identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Directory name for this identity's stores: hex SHA-256 of
    /// `"<kind>:<identifier>"`. Keeps the address out of the file system.
    #[must_use]
    pub fn storage_key(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}
