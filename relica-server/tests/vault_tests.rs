use relica_server::{BlobAdmin, BlobVault, ServerError};
use relica_types::{BlobKey, ResponseStatus};
use std::sync::Arc;
use tempfile::TempDir;

// ── Basic storage ───────────────────────────────────────────────

#[test]
fn store_then_read_round_trips() {
    let vault = BlobVault::open_in_memory().unwrap();
    let key = vault.store(b"payload bytes").unwrap();
    assert_eq!(vault.read(&key).unwrap(), b"payload bytes");
}

#[test]
fn distinct_stores_mint_distinct_keys() {
    let vault = BlobVault::open_in_memory().unwrap();
    let a = vault.store(b"same content").unwrap();
    let b = vault.store(b"same content").unwrap();
    assert_ne!(a, b);
    assert_eq!(vault.len().unwrap(), 2);
}

#[test]
fn content_hash_is_sha256_of_payload() {
    let vault = BlobVault::open_in_memory().unwrap();
    let key = vault.store(b"hello").unwrap();
    // sha256("hello")
    assert_eq!(
        vault.content_hash(&key).unwrap(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn missing_key_reads_as_not_found() {
    let vault = BlobVault::open_in_memory().unwrap();
    let ghost = BlobKey::new("blob-doesnotexist");
    assert!(matches!(
        vault.read(&ghost),
        Err(ServerError::BlobNotFound(_))
    ));
    assert!(matches!(
        vault.delete(&ghost),
        Err(ServerError::BlobNotFound(_))
    ));
}

#[test]
fn delete_removes_the_blob() {
    let vault = BlobVault::open_in_memory().unwrap();
    let key = vault.store(b"short-lived").unwrap();
    vault.delete(&key).unwrap();
    assert!(!vault.contains(&key).unwrap());
    assert!(vault.is_empty().unwrap());
}

#[test]
fn vault_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let key = {
        let vault = BlobVault::open(&path).unwrap();
        vault.store(b"durable").unwrap()
    };

    let vault = BlobVault::open(&path).unwrap();
    assert_eq!(vault.read(&key).unwrap(), b"durable");
}

// ── Administrative purge ────────────────────────────────────────

#[test]
fn purge_with_correct_secret_deletes_everything() {
    let vault = Arc::new(BlobVault::open_in_memory().unwrap());
    vault.store(b"one").unwrap();
    vault.store(b"two").unwrap();

    let admin = BlobAdmin::new(vault.clone(), "s3cret");
    let report = admin.purge_all("s3cret");

    assert_eq!(report.status, ResponseStatus::Success);
    assert_eq!(report.deleted, 2);
    assert!(vault.is_empty().unwrap());
}

#[test]
fn purge_with_wrong_secret_deletes_nothing() {
    let vault = Arc::new(BlobVault::open_in_memory().unwrap());
    vault.store(b"survivor").unwrap();

    let admin = BlobAdmin::new(vault.clone(), "s3cret");
    let report = admin.purge_all("guess");

    assert_eq!(report.status, ResponseStatus::FailedServerError);
    assert_eq!(report.deleted, 0);
    assert_eq!(vault.len().unwrap(), 1);
}
