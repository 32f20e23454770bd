//! Trace tool integration tests
//!
//! A small shell script stands in for bpftrace so these run without root
//! and without the real tool installed.

#![cfg(unix)]

use std::time::{Duration, Instant};

use cb_exec::{ProcessRunner, ToolCommand, TraceExecutor, TIMEOUT_EXIT_CODE};

const FAKE_BPFTRACE: &str = r#"
case "$1" in
  --version) echo "bpftrace v0.21.2" ;;
  --dry-run)
    case "$3" in
      *INVALID*) echo "stdin:1:1-8: ERROR: syntax error, unexpected identifier" >&2; exit 1 ;;
      *WARNONLY*) echo "WARNING: map @x is unused" >&2 ;;
    esac ;;
  -e)
    case "$2" in
      *forever*) echo "Attaching 1 tracepoint..."; exec sleep 30 ;;
      *) echo "ran: $2" ;;
    esac ;;
  *) echo "unexpected: $*" >&2; exit 2 ;;
esac
"#;

fn fake_executor() -> TraceExecutor {
    let tool = ToolCommand::new("sh").with_leading_args(["-c", FAKE_BPFTRACE, "bpftrace"]);
    TraceExecutor::new(tool, Duration::from_secs(5), false)
        .with_runner(ProcessRunner::with_grace_period(Duration::from_millis(500)))
}

#[tokio::test]
async fn test_version_and_availability() {
    let executor = fake_executor();
    assert!(executor.is_available().await);
    assert_eq!(executor.get_version().await.as_deref(), Some("v0.21.2"));
}

#[tokio::test]
async fn test_validate_accepts_valid_script() {
    let verdict = fake_executor()
        .validator()
        .validate(r#"BEGIN { printf("test\n"); }"#)
        .await;
    assert!(verdict.is_valid);
    assert!(verdict.error.is_none());
}

#[tokio::test]
async fn test_validate_rejects_invalid_script() {
    let verdict = fake_executor()
        .validator()
        .validate("INVALID SYNTAX HERE {")
        .await;
    assert!(!verdict.is_valid);
    assert!(verdict.error.unwrap().contains("syntax error"));
}

#[tokio::test]
async fn test_validate_ignores_warnings() {
    let verdict = fake_executor()
        .validator()
        .validate("tracepoint:syscalls:sys_enter_openat /* WARNONLY */ { }")
        .await;
    assert!(verdict.is_valid);
}

#[tokio::test]
async fn test_execute_script_completes() {
    let outcome = fake_executor()
        .execute_script(r#"BEGIN { printf("hi\n"); exit(); }"#, None, None)
        .await
        .unwrap();

    assert!(outcome.success());
    assert_ne!(outcome.exit_code, TIMEOUT_EXIT_CODE);
    assert!(outcome.stdout.starts_with("ran: BEGIN"));
}

#[tokio::test]
async fn test_execute_script_times_out() {
    let started = Instant::now();
    let outcome = fake_executor()
        .execute_script(
            "tracepoint:syscalls:sys_enter_openat /forever/ { }",
            Some(Duration::from_secs(1)),
            None,
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
    assert!(outcome.stderr.contains("timed out"));
    assert!(outcome.stdout.contains("Attaching 1 tracepoint"));
}

/// Dropping an in-flight execution must not leave the child running
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancelled_execution_kills_child() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

    let handle = tokio::spawn(async move {
        ProcessRunner::new()
            .execute("sh", ["-c", script.as_str()], Duration::from_secs(60), &[])
            .await
    });

    let pid = wait_for_pid(&pid_file).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    let deadline = Instant::now() + Duration::from_secs(2);
    while is_running(pid) {
        assert!(Instant::now() < deadline, "child {} survived cancellation", pid);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(target_os = "linux")]
async fn wait_for_pid(path: &std::path::Path) -> u32 {
    for _ in 0..200 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(pid) = content.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("child never wrote its pid");
}

/// Alive and not a zombie
#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state field follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(false),
        Err(_) => false,
    }
}
