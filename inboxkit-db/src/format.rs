//! On-disk layout of a store directory.
//!
//! ```text
//! <store dir>/
//!   store.header     CBOR StoreHeader (magic, version, salt, sealed verifier)
//!   store.records    CBOR RecordsFile (generation + sealed RecordSnapshot)
//!   store.lock       exclusive lock file
//!   store.deleting   present only while a deletion is in progress
//! ```
//!
//! The header is written last when a store is created, so a directory
//! without a header is not a store.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cipher::Sealed;
use crate::error::{DbError, DbResult};

pub(crate) const MAGIC: &[u8; 8] = b"INBXSTOR";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const SALT_SIZE: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreHeader {
    pub(crate) magic: [u8; 8],
    pub(crate) version: u32,
    pub(crate) salt: [u8; SALT_SIZE],
    pub(crate) created_at: u64,
    pub(crate) verifier: Sealed,
}

impl StoreHeader {
    pub(crate) fn validate(&self) -> DbResult<()> {
        if &self.magic != MAGIC {
            return Err(DbError::InvalidFormat(format!(
                "bad header magic {}",
                hex::encode(self.magic)
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(DbError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordsFile {
    pub(crate) version: u32,
    pub(crate) generation: u64,
    pub(crate) sealed: Sealed,
}

/// Decrypted contents of `store.records`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordSnapshot {
    pub(crate) generation: u64,
    pub(crate) records: BTreeMap<String, Vec<u8>>,
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|err| DbError::Serialization(err.to_string()))?;
    Ok(bytes)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    ciborium::de::from_reader(bytes).map_err(|err| DbError::Serialization(err.to_string()))
}
