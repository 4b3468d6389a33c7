//! Caller-supplied encryption key and the per-store key derived from it.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DbError, DbResult};

/// Length in bytes of an [`EncryptionKey`].
pub const KEY_LEN: usize = 32;

const STORE_KEY_INFO: &[u8] = b"inboxkit:store-key:v1";

/// 32-byte database encryption key supplied by the caller on every open.
///
/// The key is never written to disk. It is zeroized on drop and redacted in
/// `Debug` output.
pub struct EncryptionKey(SecretBox<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let mut bytes = bytes;
        let key = Self(SecretBox::new(Box::new(bytes)));
        bytes.zeroize();
        key
    }

    /// Copies a key out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidKeyLength`] unless the slice is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> DbResult<Self> {
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| DbError::InvalidKeyLength(bytes.len()))?;
        Ok(Self::from_bytes(array))
    }

    /// Parses a hex-encoded key, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not hex or not 32 bytes long.
    pub fn from_hex(input: &str) -> DbResult<Self> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = hex::decode(digits)
            .map_err(|err| DbError::InvalidFormat(format!("encryption key: {err}")))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Generates a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source fails.
    pub fn generate() -> DbResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        getrandom::fill(&mut bytes).map_err(|err| DbError::Crypto(err.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        self.0.expose_secret()
    }
}

impl Clone for EncryptionKey {
    fn clone(&self) -> Self {
        Self::from_bytes(*self.expose())
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Record key for one store, derived from the caller key and the store salt.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct StoreKey([u8; KEY_LEN]);

impl StoreKey {
    pub(crate) fn derive(key: &EncryptionKey, salt: &[u8]) -> DbResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), key.expose());
        let mut okm = [0u8; KEY_LEN];
        hk.expand(STORE_KEY_INFO, &mut okm)
            .map_err(|err| DbError::Crypto(format!("hkdf expand: {err}")))?;
        Ok(Self(okm))
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}
