//! Root folder resolution and TOML loading
//!
//! Tests that touch CA_ROOT_FOLDER run with #[serial] so they do not race on
//! the process environment.

use ca_common::config::{default_root_folder, resolve_root_folder, RootFolder, TomlConfig};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const TEST_ENV: &str = "CA_ROOT_FOLDER_TEST";

#[test]
#[serial]
fn test_no_overrides_uses_default() {
    env::remove_var(TEST_ENV);

    let root = resolve_root_folder(None, TEST_ENV, &TomlConfig::default());
    assert_eq!(root, default_root_folder());
    assert!(root.ends_with("customer-analyzer") || root.ends_with("customer_analyzer_data"));
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(TEST_ENV, "/tmp/ca-env-root");
    let toml = TomlConfig::from_str("root_folder = \"/tmp/ca-toml-root\"").unwrap();

    let root = resolve_root_folder(None, TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/tmp/ca-env-root"));

    env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(TEST_ENV, "");
    let toml = TomlConfig::from_str("root_folder = \"/tmp/ca-toml-root\"").unwrap();

    let root = resolve_root_folder(None, TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/tmp/ca-toml-root"));

    env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(TEST_ENV, "/tmp/ca-env-root");
    let toml = TomlConfig::from_str("root_folder = \"/tmp/ca-toml-root\"").unwrap();

    let root = resolve_root_folder(Some(Path::new("/tmp/ca-cli-root")), TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/tmp/ca-cli-root"));

    env::remove_var(TEST_ENV);
}

#[test]
fn test_ensure_directories_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let root = RootFolder::new(dir.path().join("nested").join("root"));

    root.ensure_directories().unwrap();
    assert!(root.models_dir().is_dir());
    assert!(root.backup_dir().is_dir());

    // Idempotent
    root.ensure_directories().unwrap();
}
