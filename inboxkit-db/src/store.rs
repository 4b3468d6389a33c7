//! Encrypted record store with single-holder handles.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cipher::{
    self, associated_data, LABEL_RECORDS, LABEL_VERIFIER, VERIFIER_PLAINTEXT,
};
use crate::error::{DbError, DbResult};
use crate::format::{
    from_cbor, to_cbor, RecordSnapshot, RecordsFile, StoreHeader, FORMAT_VERSION, MAGIC,
    SALT_SIZE,
};
use crate::key::{EncryptionKey, StoreKey};
use crate::lock::StoreLease;
use crate::paths::StorePaths;

/// Where a store lives and the label its contents are bound to.
///
/// The label is authenticated with every sealed object. Opening a store
/// directory under a different label fails exactly like a wrong key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    paths: StorePaths,
    label: Vec<u8>,
}

impl StoreConfig {
    /// Creates a config for the store at `dir` bound to `label`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, label: impl Into<Vec<u8>>) -> Self {
        Self {
            paths: StorePaths::new(dir),
            label: label.into(),
        }
    }

    /// Returns the file layout of the store.
    #[must_use]
    pub const fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Returns the binding label.
    #[must_use]
    pub fn label(&self) -> &[u8] {
        &self.label
    }
}

/// Whether [`EncryptedStore::open`] initialized a new store or loaded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// The store did not exist and was initialized by this open.
    Created,
    /// An existing store was decrypted and loaded.
    Resumed,
}

/// Entry points that operate on store directories.
#[derive(Debug)]
pub struct EncryptedStore;

impl EncryptedStore {
    /// Opens the store described by `config`, creating it if absent.
    ///
    /// # Errors
    ///
    /// * [`DbError::AlreadyOpen`] if another live handle holds the store.
    /// * [`DbError::PartialDeletion`] if an earlier deletion did not finish.
    /// * [`DbError::Decryption`] if `key` does not match the store.
    /// * I/O, format and serialization errors otherwise.
    pub fn open(config: &StoreConfig, key: &EncryptionKey) -> DbResult<StoreHandle> {
        let paths = config.paths.clone();
        fs::create_dir_all(paths.dir()).map_err(|err| DbError::io("create store directory", err))?;
        let lease = StoreLease::acquire(paths.dir(), &paths.lock_path())?;

        if paths.deletion_marker_path().exists() {
            return Err(DbError::PartialDeletion {
                path: lease.path().to_path_buf(),
                reason: "an earlier deletion did not complete".to_string(),
            });
        }

        let (state, store_key, snapshot) = match read_optional(&paths.header_path())? {
            Some(header_bytes) => {
                let (store_key, snapshot) =
                    load_existing(&paths, key, &config.label, &header_bytes)
                        .map_err(unreadable)?;
                (OpenState::Resumed, store_key, snapshot)
            }
            None => {
                let (store_key, snapshot) = initialize(&paths, key, &config.label)?;
                (OpenState::Created, store_key, snapshot)
            }
        };

        log::debug!(
            "opened store {} ({state:?}, generation {})",
            lease.path().display(),
            snapshot.generation
        );

        Ok(StoreHandle {
            paths,
            label: config.label.clone(),
            state,
            inner: Some(OpenStore {
                lease,
                key: store_key,
                snapshot,
            }),
        })
    }

    /// Returns `true` if a store, or the remains of an interrupted deletion,
    /// exists at `dir`.
    #[must_use]
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        let paths = StorePaths::new(dir);
        paths.header_path().exists() || paths.deletion_marker_path().exists()
    }

    /// Finishes erasing the store at `dir`, whatever state it was left in.
    ///
    /// Succeeds without doing anything if `dir` does not exist.
    ///
    /// # Errors
    ///
    /// * [`DbError::AlreadyOpen`] if a live handle holds the store.
    /// * [`DbError::PartialDeletion`] if erasing fails again.
    pub fn purge(dir: impl AsRef<Path>) -> DbResult<()> {
        let paths = StorePaths::new(dir);
        if !paths.dir().exists() {
            return Ok(());
        }
        let lease = StoreLease::acquire(paths.dir(), &paths.lock_path())?;
        erase(&paths, lease)
    }
}

struct OpenStore {
    lease: StoreLease,
    key: StoreKey,
    snapshot: RecordSnapshot,
}

/// Live handle on an open store.
///
/// Holding the handle holds the store: no other handle, in this process or
/// another, can open it until [`StoreHandle::close`] is called or the handle
/// is dropped. The derived record key is wiped when the handle closes.
pub struct StoreHandle {
    paths: StorePaths,
    label: Vec<u8>,
    state: OpenState,
    inner: Option<OpenStore>,
}

impl StoreHandle {
    /// Returns whether this open created the store.
    #[must_use]
    pub const fn open_state(&self) -> OpenState {
        self.state
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.paths.dir()
    }

    /// Returns `true` once the handle has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns the number of committed transactions.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after close.
    pub fn generation(&self) -> DbResult<u64> {
        Ok(self.open()?.snapshot.generation)
    }

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after close.
    pub fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.open()?.snapshot.records.get(key).cloned())
    }

    /// Returns `true` if a record is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after close.
    pub fn contains(&self, key: &str) -> DbResult<bool> {
        Ok(self.open()?.snapshot.records.contains_key(key))
    }

    /// Lists record keys starting with `prefix`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after close.
    pub fn keys_with_prefix(&self, prefix: &str) -> DbResult<Vec<String>> {
        Ok(self
            .open()?
            .snapshot
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Runs `f` inside a transaction.
    ///
    /// Writes staged on the [`Transaction`] are published together in one
    /// atomic file replace once `f` returns `Ok`. If `f` returns an error, or
    /// publishing fails, the store is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, [`DbError::Closed`] after close, or the
    /// error from publishing the new snapshot.
    pub fn with_txn<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, E>,
        E: From<DbError>,
    {
        let open = self.inner.as_mut().ok_or(DbError::Closed)?;
        let mut txn = Transaction {
            base: &open.snapshot.records,
            staged: BTreeMap::new(),
        };
        let out = f(&mut txn)?;
        let staged = txn.staged;
        if staged.is_empty() {
            return Ok(out);
        }

        let mut next = open.snapshot.clone();
        next.generation += 1;
        for (key, value) in staged {
            match value {
                Some(value) => next.records.insert(key, value),
                None => next.records.remove(&key),
            };
        }
        write_snapshot(&self.paths, &open.key, &self.label, &next)?;
        open.snapshot = next;
        Ok(out)
    }

    /// Releases the store and wipes the derived key. Idempotent.
    ///
    /// Every committed transaction is already durable, so closing never loses
    /// data.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps room for platform stores that
    /// flush on close.
    pub fn close(&mut self) -> DbResult<()> {
        if let Some(open) = self.inner.take() {
            log::debug!("closed store {}", open.lease.path().display());
        }
        Ok(())
    }

    /// Erases every persisted record of this store and removes its directory.
    ///
    /// Irreversible. The handle must still hold the store; a closed handle
    /// re-acquires it first and fails if someone else opened it meanwhile.
    ///
    /// # Errors
    ///
    /// * [`DbError::AlreadyOpen`] if the store was re-opened after close.
    /// * [`DbError::PartialDeletion`] if erasing stopped half way. The store
    ///   then refuses to open until [`EncryptedStore::purge`] completes.
    pub fn delete(mut self) -> DbResult<()> {
        let lease = match self.inner.take() {
            Some(open) => open.lease,
            None => StoreLease::acquire(self.paths.dir(), &self.paths.lock_path())?,
        };
        erase(&self.paths, lease)
    }

    fn open(&self) -> DbResult<&OpenStore> {
        self.inner.as_ref().ok_or(DbError::Closed)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.paths.dir())
            .field("state", &self.state)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Staged writes against a store snapshot.
pub struct Transaction<'a> {
    base: &'a BTreeMap<String, Vec<u8>>,
    staged: BTreeMap<String, Option<Vec<u8>>>,
}

impl Transaction<'_> {
    /// Reads `key`, observing writes staged earlier in this transaction.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        match self.staged.get(key) {
            Some(staged) => staged.as_deref(),
            None => self.base.get(key).map(Vec::as_slice),
        }
    }

    /// Stages `value` under `key`.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.staged.insert(key.into(), Some(value));
    }

    /// Stages removal of `key`.
    pub fn remove(&mut self, key: &str) {
        self.staged.insert(key.to_string(), None);
    }
}

fn initialize(
    paths: &StorePaths,
    key: &EncryptionKey,
    label: &[u8],
) -> DbResult<(StoreKey, RecordSnapshot)> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom::fill(&mut salt).map_err(|err| DbError::Crypto(err.to_string()))?;
    let store_key = StoreKey::derive(key, &salt)?;
    let verifier = cipher::seal(
        &store_key,
        &associated_data(label, LABEL_VERIFIER, &[]),
        VERIFIER_PLAINTEXT,
    )?;

    let snapshot = RecordSnapshot::default();
    write_snapshot(paths, &store_key, label, &snapshot)?;

    // The header is the commit point for a new store.
    let header = StoreHeader {
        magic: *MAGIC,
        version: FORMAT_VERSION,
        salt,
        created_at: unix_now(),
        verifier,
    };
    write_atomic(&paths.header_path(), &to_cbor(&header)?)?;
    Ok((store_key, snapshot))
}

fn load_existing(
    paths: &StorePaths,
    key: &EncryptionKey,
    label: &[u8],
    header_bytes: &[u8],
) -> DbResult<(StoreKey, RecordSnapshot)> {
    let header: StoreHeader = from_cbor(header_bytes)?;
    header.validate()?;
    let store_key = StoreKey::derive(key, &header.salt)?;
    verify_key(&store_key, label, &header)?;
    let snapshot = load_snapshot(paths, &store_key, label)?;
    Ok((store_key, snapshot))
}

/// A store that exists but cannot be decoded is unreadable with this key,
/// whatever layer noticed it.
fn unreadable(err: DbError) -> DbError {
    match err {
        DbError::Serialization(reason) | DbError::InvalidFormat(reason) => {
            DbError::decryption(format!("store contents unreadable: {reason}"))
        }
        DbError::UnsupportedVersion(version) => {
            DbError::decryption(format!("unsupported store format version {version}"))
        }
        other => other,
    }
}

fn verify_key(store_key: &StoreKey, label: &[u8], header: &StoreHeader) -> DbResult<()> {
    let plaintext = cipher::open(
        store_key,
        &associated_data(label, LABEL_VERIFIER, &[]),
        &header.verifier,
    )
    .map_err(|_| DbError::decryption("encryption key does not match this store"))?;
    if plaintext != VERIFIER_PLAINTEXT {
        return Err(DbError::decryption("key verifier mismatch"));
    }
    Ok(())
}

fn load_snapshot(
    paths: &StorePaths,
    store_key: &StoreKey,
    label: &[u8],
) -> DbResult<RecordSnapshot> {
    let Some(bytes) = read_optional(&paths.records_path())? else {
        return Err(DbError::InvalidFormat("store header without records".to_string()));
    };
    let file: RecordsFile = from_cbor(&bytes)?;
    if file.version != FORMAT_VERSION {
        return Err(DbError::UnsupportedVersion(file.version));
    }
    let aad = associated_data(label, LABEL_RECORDS, &file.generation.to_le_bytes());
    let plaintext = cipher::open(store_key, &aad, &file.sealed)?;
    let snapshot: RecordSnapshot = from_cbor(&plaintext)?;
    if snapshot.generation != file.generation {
        return Err(DbError::decryption("record generation mismatch"));
    }
    Ok(snapshot)
}

fn write_snapshot(
    paths: &StorePaths,
    store_key: &StoreKey,
    label: &[u8],
    snapshot: &RecordSnapshot,
) -> DbResult<()> {
    let aad = associated_data(label, LABEL_RECORDS, &snapshot.generation.to_le_bytes());
    let sealed = cipher::seal(store_key, &aad, &to_cbor(snapshot)?)?;
    let file = RecordsFile {
        version: FORMAT_VERSION,
        generation: snapshot.generation,
        sealed,
    };
    write_atomic(&paths.records_path(), &to_cbor(&file)?)
}

/// Erases a store while holding its lease.
///
/// The marker goes down first and comes off last, so an interrupted run is
/// always recognisable as one. The lock file and the marker are unlinked
/// before the lease is released; an opener still waiting on the old lock
/// file sees it replaced and backs off.
fn erase(paths: &StorePaths, lease: StoreLease) -> DbResult<()> {
    let dir = lease.path().to_path_buf();
    write_atomic(&paths.deletion_marker_path(), b"deleting")?;

    let partial = |context: &str, err: std::io::Error| DbError::PartialDeletion {
        path: dir.clone(),
        reason: format!("{context}: {err}"),
    };

    scrub(&paths.records_path()).map_err(|err| partial("erase records", err))?;
    remove_if_present(&StorePaths::temp_path(&paths.records_path()))
        .map_err(|err| partial("remove staged records", err))?;
    scrub(&paths.header_path()).map_err(|err| partial("erase header", err))?;
    remove_if_present(&StorePaths::temp_path(&paths.header_path()))
        .map_err(|err| partial("remove staged header", err))?;

    remove_if_present(&paths.lock_path()).map_err(|err| partial("remove lock file", err))?;
    remove_if_present(&paths.deletion_marker_path())
        .map_err(|err| partial("remove deletion marker", err))?;
    drop(lease);

    if let Err(err) = fs::remove_dir(paths.dir()) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!("store {} erased but directory kept: {err}", dir.display());
        }
    }
    log::debug!("deleted store {}", dir.display());
    Ok(())
}

/// Overwrites a file with zeros before unlinking it.
fn scrub(path: &Path) -> std::io::Result<()> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    let zeros = [0u8; 4096];
    let mut remaining = file.metadata()?.len();
    while remaining > 0 {
        let chunk = zeros.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        file.write_all(&zeros[..chunk])?;
        remaining = remaining.saturating_sub(chunk as u64);
    }
    file.sync_all()?;
    drop(file);
    fs::remove_file(path)
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn read_optional(path: &Path) -> DbResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DbError::io(format!("read {}", path.display()), err)),
    }
}

/// Replaces `path` with `bytes` via write-to-temp, fsync and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> DbResult<()> {
    let temp: PathBuf = StorePaths::temp_path(path);
    let context = || format!("write {}", path.display());
    let mut file = File::create(&temp).map_err(|err| DbError::io(context(), err))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| DbError::io(context(), err))?;
    drop(file);
    fs::rename(&temp, path).map_err(|err| DbError::io(context(), err))?;
    sync_parent(path);
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
