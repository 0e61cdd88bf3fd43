mod common;

use std::fs::File;
use std::thread;
use std::time::Duration;

use common::{assert_well_terminated, decode_file};
use jobtail::config::EngineConfig;
use jobtail::exec::{CommandSpec, Execution};
use jobtail::log::{LogError, LogReader, LogWriter, ReplayMode, ReplayOptions, StreamTag};

fn fast_follow() -> ReplayOptions {
    ReplayOptions {
        retry_interval: Duration::from_millis(10),
        ..ReplayOptions::follow()
    }
}

#[test]
fn follower_sees_records_written_after_it_started() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live");
    let writer = LogWriter::new(File::create(&path).unwrap());

    let reader = LogReader::open(&path, fast_follow()).unwrap();
    reader.start();
    let stdout = reader.stdout();
    let collected = thread::spawn(move || stdout.read_all());

    for i in 0..5 {
        writer.write(StreamTag::Stdout, format!("line {i}\n").as_bytes()).unwrap();
        thread::sleep(Duration::from_millis(30));
    }
    writer.write(StreamTag::Stderr, b"oops").unwrap();
    writer.close().unwrap();

    let stdout = collected.join().unwrap();
    assert_eq!(stdout, b"line 0\nline 1\nline 2\nline 3\nline 4\n");
    assert_eq!(reader.stderr().read_all(), b"oops");
    reader.wait().unwrap();
}

#[test]
fn follower_tails_a_running_command() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1");
    let exec = Execution::with_log_file(
        CommandSpec::from_argv(&["sh", "-c", "for i in 1 2 3; do echo $i; sleep 0.1; done"])
            .unwrap(),
        &path,
        EngineConfig::default(),
    )
    .unwrap();

    let config = EngineConfig::default();
    let reader = LogReader::open(&path, config.replay_options(ReplayMode::Follow)).unwrap();
    exec.start().unwrap();
    // The log only ends once the command is reaped.
    let waiter = thread::spawn(move || exec.wait());
    let transcript = reader.collect().unwrap();
    waiter.join().unwrap().unwrap();

    assert_eq!(transcript.stdout, b"1\n2\n3\n");
    assert!(transcript.stderr.is_empty());
    assert_well_terminated(&decode_file(&path));
}

#[test]
fn at_rest_replay_of_truncated_log_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut");
    let writer = LogWriter::new(File::create(&path).unwrap());
    writer.write(StreamTag::Stdout, b"partial").unwrap();
    drop(writer);

    let reader = LogReader::open(&path, ReplayOptions::at_rest()).unwrap();
    reader.start();
    assert_eq!(reader.stdout().read_all(), b"partial");
    assert!(matches!(reader.wait(), Err(LogError::Truncated(StreamTag::Stdout))));
    assert!(reader.stderr().is_closed());
}

#[test]
fn closing_a_follower_stops_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idle");
    let _writer = LogWriter::new(File::create(&path).unwrap());

    let reader = LogReader::open(&path, fast_follow()).unwrap();
    reader.start();
    thread::sleep(Duration::from_millis(50));
    reader.close().unwrap();
    assert!(reader.stdout().is_closed());
    assert_eq!(reader.stdout().read_all(), b"");
}

#[test]
fn small_reads_do_not_lose_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small");
    let writer = LogWriter::new(File::create(&path).unwrap());
    writer.write(StreamTag::Stdout, b"abcdefghij").unwrap();
    writer.write(StreamTag::Stdout, b"klmno").unwrap();
    writer.close().unwrap();

    let reader = LogReader::open(&path, ReplayOptions::at_rest()).unwrap();
    reader.start();
    let stdout = reader.stdout();
    let mut out = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = stdout.read_into(&mut buf);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, b"abcdefghijklmno");
}
