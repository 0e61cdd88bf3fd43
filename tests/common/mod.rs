//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::time::Duration;

use jobtail::exec::{CommandSpec, Execution};
use jobtail::log::{LogRecord, SharedBuffer, StreamTag};
use jobtail::config::EngineConfig;
use tempfile::TempDir;

/// Find an available port for testing.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to free port");
    listener.local_addr().unwrap().port()
}

/// Create a temporary config file with the given TOML body.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

/// Wait for a server to become available.
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

// -- Log helpers ---------------------------------------------------------------

/// Decodes every line of an in-memory log.
pub fn decode(bytes: &[u8]) -> Vec<LogRecord> {
    bytes
        .split_inclusive(|b| *b == b'\n')
        .map(|line| LogRecord::from_line(line).expect("valid record"))
        .collect()
}

/// Decodes a log file.
pub fn decode_file(path: &Path) -> Vec<LogRecord> {
    decode(&std::fs::read(path).expect("log file readable"))
}

/// Concatenated payload of one tag.
pub fn payload(records: &[LogRecord], tag: StreamTag) -> Vec<u8> {
    records
        .iter()
        .filter(|r| r.tag == tag)
        .flat_map(|r| r.data.iter().copied())
        .collect()
}

/// Runs `spec` to completion into an in-memory log and returns its records.
pub fn run_to_log(spec: CommandSpec) -> Vec<LogRecord> {
    let buffer = SharedBuffer::new();
    let exec = Execution::new(spec, buffer.clone(), EngineConfig::default());
    exec.start().expect("start");
    let _ = exec.wait();
    decode(&buffer.contents())
}

/// Every tag has exactly one terminal record, and nothing follows it.
pub fn assert_well_terminated(records: &[LogRecord]) {
    for tag in StreamTag::ALL {
        let positions: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.tag == tag && r.eof)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positions.len(), 1, "{tag} needs one terminal record");
        let last = records.iter().rposition(|r| r.tag == tag).unwrap();
        assert_eq!(last, positions[0], "{tag} has data after its terminal record");
    }
}
