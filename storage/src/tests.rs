use crate::{read_records, write_records, ProfileStore};
use std::env;
use std::path::PathBuf;
use sync_core::{ProfileRecord, UserProfile};

fn temp_path(extension: &str) -> PathBuf {
    env::temp_dir().join(format!(
        "test_follower_sync_{}.{}",
        uuid::Uuid::new_v4(),
        extension
    ))
}

fn sample_record(login: &str) -> ProfileRecord {
    let mut profile = UserProfile::new(login);
    profile.id = Some(42);
    profile.public_repos = 12;
    profile.followers = 20;
    profile.top_language = Some("Python".to_string());
    profile.to_record()
}

#[test]
fn test_csv_write_and_read_back() {
    let path = temp_path("csv");

    let records = vec![sample_record("octocat"), sample_record("mona")];
    write_records(&path, &records).expect("write should succeed");

    let loaded: Vec<ProfileRecord> = read_records(&path).expect("read should succeed");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].login, "octocat");
    assert_eq!(loaded[0].top_language.as_deref(), Some("Python"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_json_write_and_read_back() {
    let path = temp_path("json");

    write_records(&path, &[sample_record("octocat")]).expect("write should succeed");
    let loaded: Vec<ProfileRecord> = read_records(&path).expect("read should succeed");
    assert_eq!(loaded[0].followers, 20);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_jsonl_skips_blank_lines() {
    let path = temp_path("jsonl");

    write_records(&path, &[sample_record("octocat")]).expect("write should succeed");

    // Simulate a trailing blank line left by manual editing
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push('\n');
    std::fs::write(&path, content).unwrap();

    let loaded: Vec<ProfileRecord> = read_records(&path).expect("read should succeed");
    assert_eq!(loaded.len(), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_store_open_on_missing_file_is_empty() {
    let path = temp_path("csv");

    let store = ProfileStore::open(&path).expect("open should succeed");
    assert!(store.is_empty());
    assert!(!store.contains("octocat"));
}

#[test]
fn test_store_append_flush_and_reload() {
    let path = temp_path("csv");

    let mut store = ProfileStore::open(&path).expect("open should succeed");
    store.append(sample_record("octocat"));
    store.append(sample_record("mona"));
    store.flush().expect("flush should succeed");

    let reloaded = ProfileStore::open(&path).expect("reopen should succeed");
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.contains("octocat"));
    assert!(reloaded.contains("OCTOCAT"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_store_replaces_duplicate_logins() {
    let path = temp_path("csv");

    let mut store = ProfileStore::open(&path).expect("open should succeed");
    store.append(sample_record("octocat"));

    let mut updated = sample_record("octocat");
    updated.followers = 99;
    store.append(updated);

    assert_eq!(store.len(), 1);
    store.flush().expect("flush should succeed");

    let loaded: Vec<ProfileRecord> = read_records(&path).unwrap();
    assert_eq!(loaded[0].followers, 99);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_store_rejects_unknown_extension() {
    let path = temp_path("xlsx");
    assert!(ProfileStore::open(&path).is_err());
}

#[test]
fn test_flush_without_changes_is_noop() {
    let path = temp_path("csv");

    let mut store = ProfileStore::open(&path).expect("open should succeed");
    store.flush().expect("flush of clean store should succeed");
    // No file should have been created for an empty, unchanged store
    assert!(!path.exists());
}
