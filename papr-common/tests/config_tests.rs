//! Integration tests for configuration loading and path resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate PAPR_* variables are marked with #[serial].

use papr_common::config::{
    resolve_config_path, resolve_database_path, write_toml_config, TomlConfig, ENV_CONFIG_PATH,
    ENV_DATABASE_PATH, ENV_SCORING_API_KEY, ENV_SCORING_MODEL,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = TomlConfig::load(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.orchestrator.workers, 5);
    assert!(config.database_path.is_none());
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[store\npage_size = ").unwrap();

    match TomlConfig::load(&path) {
        Err(papr_common::Error::Config(message)) => assert!(message.contains("broken.toml")),
        other => panic!("expected a config error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_write_then_load_preserves_tuning() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("papr.toml");

    let mut config = TomlConfig::default();
    config.store.page_size = 250;
    config.store.suspect_page_sizes = vec![1000];
    config.scoring.model = Some("test-model".to_string());

    write_toml_config(&config, &path).unwrap();
    let loaded = TomlConfig::load(&path).unwrap();

    assert_eq!(loaded.store.page_size, 250);
    assert_eq!(loaded.store.suspect_page_sizes, vec![1000]);
    assert_eq!(loaded.scoring.model.as_deref(), Some("test-model"));
}

#[test]
#[serial]
fn test_env_overrides_take_priority_over_toml() {
    let mut config: TomlConfig =
        toml::from_str("[scoring]\napi_key = \"from-toml\"\nmodel = \"toml-model\"\n").unwrap();

    env::set_var(ENV_SCORING_API_KEY, "from-env");
    env::remove_var(ENV_SCORING_MODEL);
    config.apply_env_overrides();
    env::remove_var(ENV_SCORING_API_KEY);

    assert_eq!(config.scoring.api_key.as_deref(), Some("from-env"));
    assert_eq!(config.scoring.model.as_deref(), Some("toml-model"));
}

#[test]
#[serial]
fn test_blank_env_value_is_ignored() {
    let mut config = TomlConfig::default();
    config.scoring.api_key = Some("kept".to_string());

    env::set_var(ENV_SCORING_API_KEY, "   ");
    config.apply_env_overrides();
    env::remove_var(ENV_SCORING_API_KEY);

    assert_eq!(config.scoring.api_key.as_deref(), Some("kept"));
}

#[test]
#[serial]
fn test_database_path_priority_order() {
    let config = TomlConfig {
        database_path: Some(PathBuf::from("/toml/papr.db")),
        ..TomlConfig::default()
    };

    env::set_var(ENV_DATABASE_PATH, "/env/papr.db");
    assert_eq!(
        resolve_database_path(Some(Path::new("/cli/papr.db")), &config),
        PathBuf::from("/cli/papr.db")
    );
    assert_eq!(resolve_database_path(None, &config), PathBuf::from("/env/papr.db"));

    env::remove_var(ENV_DATABASE_PATH);
    assert_eq!(resolve_database_path(None, &config), PathBuf::from("/toml/papr.db"));

    let fallback = resolve_database_path(None, &TomlConfig::default());
    assert!(fallback.ends_with("papr/papr.db"));
}

#[test]
#[serial]
fn test_config_path_uses_env_when_no_cli_arg() {
    env::set_var(ENV_CONFIG_PATH, "/env/config.toml");
    assert_eq!(resolve_config_path(None), PathBuf::from("/env/config.toml"));
    env::remove_var(ENV_CONFIG_PATH);

    assert!(resolve_config_path(None).ends_with("papr/config.toml"));
}
