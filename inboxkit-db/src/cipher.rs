//! XChaCha20-Poly1305 sealing for store contents.
//!
//! Every sealed object carries its own random 24-byte nonce. Associated data
//! binds ciphertext to the store label and to the object's role, so a record
//! snapshot copied into another store (or replayed as a verifier) fails
//! authentication instead of decrypting.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::key::StoreKey;

/// Nonce size for XChaCha20-Poly1305.
pub(crate) const NONCE_SIZE: usize = 24;

pub(crate) const LABEL_VERIFIER: &[u8] = b"inboxkit:store:verifier";
pub(crate) const LABEL_RECORDS: &[u8] = b"inboxkit:store:records";

/// Plaintext sealed into the header to check the key on open.
pub(crate) const VERIFIER_PLAINTEXT: &[u8] = b"inboxkit key verifier v1";

/// Nonce and ciphertext (with tag) of one sealed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Sealed {
    pub(crate) nonce: [u8; NONCE_SIZE],
    pub(crate) ciphertext: Vec<u8>,
}

/// Builds associated data as `store_label || role || suffix`.
pub(crate) fn associated_data(store_label: &[u8], role: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(store_label.len() + role.len() + suffix.len() + 1);
    aad.extend_from_slice(store_label);
    aad.push(0);
    aad.extend_from_slice(role);
    aad.extend_from_slice(suffix);
    aad
}

pub(crate) fn seal(key: &StoreKey, aad: &[u8], plaintext: &[u8]) -> DbResult<Sealed> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|err| DbError::Crypto(err.to_string()))?;
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::fill(&mut nonce).map_err(|err| DbError::Crypto(err.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| DbError::Crypto("XChaCha20-Poly1305 encryption failed".to_string()))?;
    Ok(Sealed { nonce, ciphertext })
}

pub(crate) fn open(key: &StoreKey, aad: &[u8], sealed: &Sealed) -> DbResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|err| DbError::Crypto(err.to_string()))?;
    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map_err(|_| DbError::decryption("XChaCha20-Poly1305 authentication failed"))
}
