#![cfg(unix)]

use gatherd::GatherError;
use gatherd::core::subprocess::{CommandSpec, run_command};
use std::time::Duration;

#[tokio::test]
async fn test_collects_stdout() {
    let mut spec = CommandSpec::new("/bin/sh");
    spec.args = vec!["-c".into(), "echo up=1".into()];
    let out = run_command(&spec, Duration::from_secs(5)).await.unwrap();
    assert_eq!(&out.stdout[..], b"up=1\n");
    assert_eq!(out.exit_code, Some(0));
}

#[tokio::test]
async fn test_nonzero_exit_is_gated() {
    let mut spec = CommandSpec::new("/bin/sh");
    spec.args = vec!["-c".into(), "echo partial; exit 3".into()];
    let err = run_command(&spec, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, GatherError::SubprocessExit(3)));
}

#[tokio::test]
async fn test_any_exit_code_accepted_when_not_gated() {
    let mut spec = CommandSpec::new("/bin/sh");
    spec.args = vec!["-c".into(), "echo partial; exit 3".into()];
    spec.require_zero_exit = false;
    let out = run_command(&spec, Duration::from_secs(5)).await.unwrap();
    assert_eq!(&out.stdout[..], b"partial\n");
    assert_eq!(out.exit_code, Some(3));
}

#[tokio::test]
async fn test_stderr_is_line_framed_and_separate() {
    let mut spec = CommandSpec::new("/bin/sh");
    spec.args = vec!["-c".into(), "echo out; echo err1 >&2; echo err2 >&2".into()];
    let out = run_command(&spec, Duration::from_secs(5)).await.unwrap();
    assert_eq!(&out.stdout[..], b"out\n");
    assert_eq!(out.stderr_lines, vec!["err1".to_string(), "err2".to_string()]);
}

#[tokio::test]
async fn test_deadline_kills_the_child() {
    let mut spec = CommandSpec::new("/bin/sh");
    spec.args = vec!["-c".into(), "sleep 30".into()];
    let started = std::time::Instant::now();
    let err = run_command(&spec, Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, GatherError::FetchTimeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_program_is_an_error() {
    let spec = CommandSpec::new("/no/such/binary");
    let err = run_command(&spec, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, GatherError::Subprocess(_)));
}

#[test]
fn test_signature_renders_the_command_line() {
    let mut spec = CommandSpec::new("vmstat");
    spec.args = vec!["-s".into()];
    assert_eq!(spec.signature(), "vmstat -s");
}
