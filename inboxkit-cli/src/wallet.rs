//! Local private-key wallet used as the installation signer.

use alloy::signers::{local::PrivateKeySigner, Signer as _};
use eyre::WrapErr;
use inboxkit_core::{AccountIdentity, Signer, SignerError};

/// EOA signer backed by an in-memory secp256k1 key.
#[derive(Debug)]
pub struct WalletSigner {
    inner: PrivateKeySigner,
}

impl WalletSigner {
    /// Parses a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> eyre::Result<Self> {
        let inner = private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .wrap_err("invalid wallet private key")?;
        Ok(Self { inner })
    }

    /// Generates a throwaway wallet.
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    /// Returns the wallet's private key as `0x` hex.
    pub fn private_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.inner.to_bytes()))
    }
}

impl Signer for WalletSigner {
    fn identity(&self) -> AccountIdentity {
        AccountIdentity::ethereum(self.inner.address())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature = self
            .inner
            .sign_message(message)
            .await
            .map_err(|err| SignerError::Rejected(err.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}
