// tests/integration_test.rs

//! Integration tests for apm
//!
//! These tests verify end-to-end functionality across modules.

use apm::db;
use apm::db::query::{FilterValue, PackageField, QuerySpec, SortOrder};
use apm::db::store::{Package, PackageStore, Scope};
use std::collections::HashMap;
use tempfile::NamedTempFile;

#[test]
fn test_database_lifecycle() {
    // Create a temporary database
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    // Remove the temp file so init can create it
    drop(temp_file);

    // Initialize the database
    let init_result = db::init(&db_path);
    assert!(
        init_result.is_ok(),
        "Database initialization should succeed"
    );

    // Verify database file exists
    assert!(
        std::path::Path::new(&db_path).exists(),
        "Database file should exist after initialization"
    );

    // Open the database
    let conn_result = db::open(&db_path);
    assert!(conn_result.is_ok(), "Opening database should succeed");

    // Verify we can execute a simple query
    let conn = conn_result.unwrap();
    let result: Result<i32, _> = conn.query_row("SELECT 1", [], |row| row.get(0));
    assert_eq!(result.unwrap(), 1, "Should be able to execute queries");
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested/path/to/apm.db")
        .to_str()
        .unwrap()
        .to_string();

    let result = db::init(&db_path);
    assert!(result.is_ok(), "Should create parent directories");
    assert!(
        std::path::Path::new(&db_path).exists(),
        "Database should exist in nested path"
    );
}

#[test]
fn test_database_pragmas_are_set() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    db::init(&db_path).unwrap();
    let conn = db::open(&db_path).unwrap();

    // Verify WAL mode (on a fresh init)
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(
        journal_mode.to_lowercase(),
        "wal",
        "Journal mode should be WAL"
    );
}

fn sample(name: &str, section: &str, size: i64) -> Package {
    Package {
        name: name.to_string(),
        section: section.to_string(),
        version: "1.0".to_string(),
        size,
        ..Package::default()
    }
}

#[test]
fn test_scan_reconcile_query_cycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    let store = PackageStore::new(db::init(&db_path).unwrap()).unwrap();

    // Full scan replaces the host scope
    let packages = vec![
        sample("vim", "editors", 300),
        sample("nano", "editors", 100),
        sample("curl", "net", 200),
    ];
    store.replace_all(&Scope::Host, &packages).unwrap();

    // Reconcile against the authoritative installed set
    let mut snapshot = HashMap::new();
    snapshot.insert("vim".to_string(), "1.0".to_string());
    store.reconcile_installed(&Scope::Host, &snapshot).unwrap();

    let vim = store.get_by_name(&Scope::Host, "vim").unwrap();
    assert!(vim.installed);
    assert_eq!(vim.version_installed, "1.0");
    let nano = store.get_by_name(&Scope::Host, "nano").unwrap();
    assert!(!nano.installed);

    // Filtered, sorted, paginated listing
    let spec = QuerySpec::new()
        .filter(PackageField::Section, FilterValue::Text("editors".to_string()))
        .sort(PackageField::Size, SortOrder::Desc)
        .paginate(10, 0);
    let listed = store.query(&Scope::Host, &spec).unwrap();
    let names: Vec<&str> = listed.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["vim", "nano"]);

    // A later scan fully replaces the previous one
    store
        .replace_all(&Scope::Host, &[sample("vim", "editors", 300)])
        .unwrap();
    assert!(store.get_by_name(&Scope::Host, "curl").is_err());
}

#[test]
fn test_reopened_database_keeps_data() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    {
        let store = PackageStore::new(db::init(&db_path).unwrap()).unwrap();
        store
            .replace_all(&Scope::Host, &[sample("vim", "editors", 300)])
            .unwrap();
    }

    let store = PackageStore::new(db::open(&db_path).unwrap()).unwrap();
    assert!(store.exists(&Scope::Host).unwrap());
    let vim = store.get_by_name(&Scope::Host, "vim").unwrap();
    assert_eq!(vim.section, "editors");
}
