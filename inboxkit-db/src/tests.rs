use std::fs;

use super::*;

fn config(dir: &std::path::Path) -> StoreConfig {
    StoreConfig::new(dir.join("store"), "inboxkit:test")
}

fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::from_bytes([byte; KEY_LEN])
}

#[test]
fn test_open_creates_then_resumes() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    assert!(!EncryptedStore::exists(config.paths().dir()));

    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    assert_eq!(handle.open_state(), OpenState::Created);
    assert!(EncryptedStore::exists(config.paths().dir()));
    handle
        .with_txn(|txn| {
            txn.put("installation/current", b"abc".to_vec());
            Ok::<_, DbError>(())
        })
        .expect("commit");
    handle.close().expect("close");

    let handle = EncryptedStore::open(&config, &key(1)).expect("resume");
    assert_eq!(handle.open_state(), OpenState::Resumed);
    assert_eq!(
        handle.get("installation/current").expect("get"),
        Some(b"abc".to_vec())
    );
    assert_eq!(handle.generation().expect("generation"), 1);
}

#[test]
fn test_wrong_key_is_decryption_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    drop(EncryptedStore::open(&config, &key(1)).expect("create"));

    let err = EncryptedStore::open(&config, &key(2)).expect_err("wrong key");
    assert!(err.is_decryption(), "unexpected error: {err}");

    // The store is unchanged and the right key still opens it.
    let handle = EncryptedStore::open(&config, &key(1)).expect("reopen");
    assert_eq!(handle.open_state(), OpenState::Resumed);
}

#[test]
fn test_other_label_is_decryption_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    drop(EncryptedStore::open(&config, &key(1)).expect("create"));

    let relabelled = StoreConfig::new(config.paths().dir(), "inboxkit:other");
    let err = EncryptedStore::open(&relabelled, &key(1)).expect_err("other label");
    assert!(err.is_decryption());
}

#[test]
fn test_tampered_records_fail_to_open() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle
        .with_txn(|txn| {
            txn.put("k", vec![1; 64]);
            Ok::<_, DbError>(())
        })
        .expect("commit");
    drop(handle);

    let path = config.paths().records_path();
    let mut bytes = fs::read(&path).expect("read records");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&path, bytes).expect("write records");

    let err = EncryptedStore::open(&config, &key(1)).expect_err("tampered");
    assert!(err.is_decryption(), "unexpected error: {err}");
}

#[test]
fn test_truncated_files_are_decryption_errors() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle
        .with_txn(|txn| {
            txn.put("k", vec![1; 64]);
            Ok::<_, DbError>(())
        })
        .expect("commit");
    drop(handle);

    for path in [config.paths().records_path(), config.paths().header_path()] {
        let original = fs::read(&path).expect("read");
        fs::write(&path, &original[..original.len() / 2]).expect("truncate");

        let err = EncryptedStore::open(&config, &key(1)).expect_err("truncated");
        assert!(err.is_decryption(), "unexpected error: {err}");
        // A damaged store is reported, never reinitialized.
        assert!(config.paths().header_path().exists());

        fs::write(&path, &original).expect("restore");
    }

    let handle = EncryptedStore::open(&config, &key(1)).expect("reopen");
    assert_eq!(handle.get("k").expect("get"), Some(vec![1; 64]));
}

#[test]
fn test_missing_records_file_is_decryption_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    drop(EncryptedStore::open(&config, &key(1)).expect("create"));
    fs::remove_file(config.paths().records_path()).expect("remove records");

    let err = EncryptedStore::open(&config, &key(1)).expect_err("no records");
    assert!(err.is_decryption(), "unexpected error: {err}");
}

#[test]
fn test_records_are_not_plaintext() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle
        .with_txn(|txn| {
            txn.put("identity", b"0xfeedfacefeedface".to_vec());
            Ok::<_, DbError>(())
        })
        .expect("commit");
    drop(handle);

    let needle = b"feedfacefeedface";
    for path in [config.paths().records_path(), config.paths().header_path()] {
        let bytes = fs::read(&path).expect("read");
        assert!(!bytes.windows(needle.len()).any(|w| w == needle));
        assert!(!bytes.windows(8).any(|w| w == b"identity"));
    }
}

#[test]
fn test_failed_txn_leaves_store_unchanged() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle
        .with_txn(|txn| {
            txn.put("a", b"1".to_vec());
            Ok::<_, DbError>(())
        })
        .expect("commit");

    let result: Result<(), DbError> = handle.with_txn(|txn| {
        txn.put("a", b"2".to_vec());
        txn.put("b", b"3".to_vec());
        assert_eq!(txn.get("a"), Some(&b"2"[..]));
        Err(DbError::InvalidFormat("abort".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(handle.get("a").expect("get"), Some(b"1".to_vec()));
    assert!(!handle.contains("b").expect("contains"));
    drop(handle);

    let handle = EncryptedStore::open(&config, &key(1)).expect("reopen");
    assert_eq!(handle.get("a").expect("get"), Some(b"1".to_vec()));
    assert!(!handle.contains("b").expect("contains"));
}

#[test]
fn test_txn_remove_and_prefix_scan() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut handle = EncryptedStore::open(&config(root.path()), &key(1)).expect("create");
    handle
        .with_txn(|txn| {
            txn.put("retired/01", vec![]);
            txn.put("retired/02", vec![]);
            txn.put("registry/current", vec![]);
            Ok::<_, DbError>(())
        })
        .expect("commit");
    handle
        .with_txn(|txn| {
            txn.remove("retired/01");
            assert_eq!(txn.get("retired/01"), None);
            Ok::<_, DbError>(())
        })
        .expect("commit");

    assert_eq!(
        handle.keys_with_prefix("retired/").expect("scan"),
        vec!["retired/02".to_string()]
    );
    assert_eq!(handle.generation().expect("generation"), 2);
}

#[test]
fn test_second_open_is_already_open() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut first = EncryptedStore::open(&config, &key(1)).expect("create");

    let err = EncryptedStore::open(&config, &key(1)).expect_err("second open");
    assert!(matches!(err, DbError::AlreadyOpen { .. }));
    // A wrong key does not get past the lock either.
    let err = EncryptedStore::open(&config, &key(9)).expect_err("second open");
    assert!(matches!(err, DbError::AlreadyOpen { .. }));

    first.close().expect("close");
    first.close().expect("close is idempotent");
    assert!(first.is_closed());
    assert!(matches!(first.get("a"), Err(DbError::Closed)));

    EncryptedStore::open(&config, &key(1)).expect("open after close");
}

#[test]
fn test_delete_removes_everything() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle.delete().expect("delete");

    assert!(!EncryptedStore::exists(config.paths().dir()));
    assert!(!config.paths().dir().exists());

    let handle = EncryptedStore::open(&config, &key(2)).expect("recreate");
    assert_eq!(handle.open_state(), OpenState::Created);
}

#[test]
fn test_delete_after_close_reacquires() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    let mut handle = EncryptedStore::open(&config, &key(1)).expect("create");
    handle.close().expect("close");

    let other = EncryptedStore::open(&config, &key(1)).expect("reopen");
    let err = handle.delete().expect_err("held elsewhere");
    assert!(matches!(err, DbError::AlreadyOpen { .. }));

    other.delete().expect("delete");
    assert!(!EncryptedStore::exists(config.paths().dir()));
}

#[test]
fn test_deletion_marker_blocks_open_until_purged() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    drop(EncryptedStore::open(&config, &key(1)).expect("create"));

    // Simulate a deletion that stopped after erasing the records.
    fs::write(config.paths().deletion_marker_path(), b"deleting").expect("marker");
    fs::remove_file(config.paths().records_path()).expect("remove records");

    assert!(EncryptedStore::exists(config.paths().dir()));
    let err = EncryptedStore::open(&config, &key(1)).expect_err("partial");
    assert!(matches!(err, DbError::PartialDeletion { .. }));

    EncryptedStore::purge(config.paths().dir()).expect("purge");
    assert!(!EncryptedStore::exists(config.paths().dir()));
    EncryptedStore::purge(config.paths().dir()).expect("purge is idempotent");

    let handle = EncryptedStore::open(&config, &key(1)).expect("fresh store");
    assert_eq!(handle.open_state(), OpenState::Created);
}

#[test]
fn test_directory_without_header_is_created_fresh() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = config(root.path());
    fs::create_dir_all(config.paths().dir()).expect("mkdir");
    fs::write(config.paths().records_path(), b"leftover").expect("write");

    let handle = EncryptedStore::open(&config, &key(1)).expect("create");
    assert_eq!(handle.open_state(), OpenState::Created);
}
