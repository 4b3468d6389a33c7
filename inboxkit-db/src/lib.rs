//! Encrypted on-device record store.
//!
//! A store is a directory holding a header and one sealed snapshot of
//! string-keyed records. Everything except the header's salt and format
//! version is encrypted with XChaCha20-Poly1305 under a key derived (HKDF-SHA256)
//! from the caller's 32-byte [`EncryptionKey`]. The caller key itself is
//! never persisted.
//!
//! * At most one [`StoreHandle`] holds a store at a time, across threads and
//!   processes. A second open fails with [`DbError::AlreadyOpen`].
//! * [`StoreHandle::with_txn`] publishes all staged writes with one atomic
//!   file replace, so readers see either the old or the new snapshot.
//! * [`StoreHandle::delete`] leaves a marker until every file is gone. A store
//!   with the marker refuses to open and can be finished with
//!   [`EncryptedStore::purge`].

mod cipher;
pub mod error;
mod format;
mod key;
mod lock;
mod paths;
mod store;

pub use error::{DbError, DbResult};
pub use key::{EncryptionKey, KEY_LEN};
pub use paths::StorePaths;
pub use store::{EncryptedStore, OpenState, StoreConfig, StoreHandle, Transaction};

#[cfg(test)]
mod tests;
