use std::io::Write;
use std::path::PathBuf;

use treeflow_core::config::{AppConfig, GuardPolicy};
use treeflow_core::TreeFlowError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[store]
path = "/tmp/treeflow-test/flows.db"

[routing]
max_visits = 3
on_guard_rejected = "stop"

[log]
filter = "treeflow=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.store_path(), PathBuf::from("/tmp/treeflow-test/flows.db"));
    assert_eq!(config.routing.max_visits, 3);
    assert_eq!(config.routing.on_guard_rejected, GuardPolicy::Stop);
    assert_eq!(config.log.filter, "treeflow=debug");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("TREEFLOW_TEST_DB_DIR", "/srv/treeflow");

    let toml_content = r#"
[store]
path = "${TREEFLOW_TEST_DB_DIR}/flows.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/srv/treeflow/flows.db");

    std::env::remove_var("TREEFLOW_TEST_DB_DIR");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"# nothing configured\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.routing.max_visits, 5);
    assert_eq!(config.routing.on_guard_rejected, GuardPolicy::FallThrough);
    assert_eq!(config.log.filter, "treeflow=info,warn");
    assert!(config.store_path().ends_with(".treeflow/treeflow.db"));
}

#[test]
fn test_zero_max_visits_rejected() {
    let toml_content = r#"
[routing]
max_visits = 0
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, TreeFlowError::Config(_)));
}

#[test]
fn test_unknown_guard_policy_rejected() {
    let toml_content = r#"
[routing]
on_guard_rejected = "ignore"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    assert!(AppConfig::load(tmp.path()).is_err());
}

#[test]
fn test_missing_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/treeflow.toml")).unwrap_err();
    assert!(matches!(err, TreeFlowError::ConfigNotFound(_)));
}
