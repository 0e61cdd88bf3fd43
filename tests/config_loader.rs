mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::temp_config;
use jobtail::config::{Config, ConfigError};
use jobtail::log::ReplayMode;

#[test]
fn test_config_default_values() {
    let config = Config::default();

    assert_eq!(config.server.bind_addr, "127.0.0.1:8181");
    assert_eq!(config.server.log_dir, PathBuf::from("./log"));

    assert_eq!(config.engine.chunk_size, 4096);
    assert_eq!(config.engine.poll_interval_ms, 50);
    assert_eq!(config.engine.stream_buffer_capacity, 64);
    assert_eq!(config.engine.tail_retry_ms, 100);
    assert_eq!(config.engine.pty_rows, 24);
    assert_eq!(config.engine.pty_cols, 80);
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("jobtail/config.toml"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:8181");
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let (_dir, path) = temp_config(
        r#"
[server]
log_dir = "/var/log/jobtail"

[engine]
chunk_size = 1024
tail_retry_ms = 25
"#,
    );
    let config = Config::load_from(&path).unwrap();

    assert_eq!(config.server.log_dir, PathBuf::from("/var/log/jobtail"));
    assert_eq!(config.server.bind_addr, "127.0.0.1:8181");
    assert_eq!(config.engine.chunk_size, 1024);
    assert_eq!(config.engine.poll_interval_ms, 50);

    let replay = config.engine.replay_options(ReplayMode::Follow);
    assert_eq!(replay.retry_interval, Duration::from_millis(25));
    assert_eq!(replay.capacity, 64);
    assert_eq!(config.engine.chunk_options().chunk_size, 1024);
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let (_dir, path) = temp_config("[server\nbind_addr = ");
    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::ParseError { .. })
    ));
}

#[test]
fn test_zero_capacity_fails_validation() {
    let (_dir, path) = temp_config("[engine]\nstream_buffer_capacity = 0\n");
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
    assert!(err.to_string().contains("stream_buffer_capacity"));
}
