// ==========================
// tests/unit/config_tests.rs
// ==========================
//! Settings loaded from files on disk
use backend_lib::{config::Settings, AppError};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.toml");
    fs::write(
        &path,
        r#"
        [server]
        host = "0.0.0.0"
        port = 9300

        [presence]
        heartbeat_interval_secs = 15
        stale_after_secs = 45
        auth_grace_secs = 5

        [broadcast]
        queue_capacity = 16

        [log]
        json = true
        "#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.bind_addr().unwrap().to_string(), "0.0.0.0:9300");
    assert_eq!(settings.presence.heartbeat_interval(), Duration::from_secs(15));
    assert_eq!(settings.presence.stale_after(), Duration::from_secs(45));
    assert_eq!(settings.presence.auth_grace(), Duration::from_secs(5));
    // untouched keys keep their defaults
    assert_eq!(settings.presence.sweep_interval(), Duration::from_secs(30));
    assert_eq!(settings.broadcast.queue_capacity, 16);
    assert!(settings.log.json);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_stale_threshold_must_exceed_heartbeat() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.toml");
    fs::write(
        &path,
        "[presence]\nheartbeat_interval_secs = 30\nstale_after_secs = 30\n",
    )
    .unwrap();

    let err = Settings::load_from(&path).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
    assert_eq!(err.error_code(), "CFG_001");
}

#[test]
fn test_malformed_file_is_a_settings_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.toml");
    fs::write(&path, "[server]\nport = \"eighty\"\n").unwrap();

    let err = Settings::load_from(&path).unwrap_err();
    assert!(matches!(err, AppError::Settings(_)));
    assert_eq!(err.error_code(), "CFG_002");
}
