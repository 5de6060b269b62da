use super::*;
use crate::testing::sid;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

fn shell(dir: &Path, script: &str, timeout: Duration) -> Invocation {
    Invocation {
        job_id: "job-test".to_string(),
        stage: sid("worker"),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::from([("ARTIFACTFLOW_STAGE".to_string(), "worker".to_string())]),
        working_dir: dir.to_path_buf(),
        timeout,
        inputs: BTreeMap::new(),
        outputs: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_exit_code_and_output_captured() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(dir.path(), "echo to-stdout; echo to-stderr >&2; exit 3", Duration::from_secs(10));

    let outcome = SubprocessSupervisor::new()
        .run(&inv, &CancellationToken::new())
        .await;

    assert_eq!(outcome.exit, ProcessExit::Exited { code: 3 });
    assert!(outcome.output.text.contains("to-stdout"));
    assert!(outcome.output.text.contains("to-stderr"));
    assert_eq!(outcome.stage, sid("worker"));
    assert!(outcome.ended_at >= outcome.started_at);
}

#[tokio::test]
async fn test_environment_and_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(
        dir.path(),
        "printf '%s' \"$ARTIFACTFLOW_STAGE\" > stage.txt",
        Duration::from_secs(10),
    );

    let outcome = SubprocessSupervisor::new()
        .run(&inv, &CancellationToken::new())
        .await;

    assert!(outcome.exit.is_success());
    assert_eq!(std::fs::read_to_string(dir.path().join("stage.txt")).unwrap(), "worker");
}

#[tokio::test]
async fn test_timeout_kills_worker() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(dir.path(), "sleep 30", Duration::from_millis(200));

    let start = Instant::now();
    let outcome = SubprocessSupervisor::new()
        .run(&inv, &CancellationToken::new())
        .await;

    assert_eq!(outcome.exit, ProcessExit::TimedOut { timeout_ms: 200 });
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_timeout_kills_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    // The background sleep inherits stdout; if it survived the kill, the
    // readers would stay open until the ten second grace period ran out.
    let inv = shell(dir.path(), "sleep 30 & sleep 30", Duration::from_millis(300));

    let start = Instant::now();
    let outcome = SubprocessSupervisor::new()
        .with_reader_grace(Duration::from_secs(10))
        .run(&inv, &CancellationToken::new())
        .await;

    assert!(matches!(outcome.exit, ProcessExit::TimedOut { .. }));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_crash_signal_reported() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(dir.path(), "kill -SEGV $$", Duration::from_secs(10));

    let outcome = SubprocessSupervisor::new()
        .run(&inv, &CancellationToken::new())
        .await;

    assert_eq!(outcome.exit, ProcessExit::Signaled { signal: 11 });
}

#[tokio::test]
async fn test_cancellation_kills_worker() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(dir.path(), "sleep 30", Duration::from_secs(60));
    let token = Arc::new(CancellationToken::new());

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            token.cancel("operator abort");
        })
    };

    let start = Instant::now();
    let outcome = SubprocessSupervisor::new().run(&inv, &token).await;
    canceller.await.unwrap();

    assert_eq!(
        outcome.exit,
        ProcessExit::Cancelled {
            reason: "operator abort".to_string()
        }
    );
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut inv = shell(dir.path(), "", Duration::from_secs(1));
    inv.program = "/definitely/not/a/worker".to_string();

    let outcome = SubprocessSupervisor::new()
        .run(&inv, &CancellationToken::new())
        .await;

    match outcome.exit {
        ProcessExit::SpawnFailed { message } => assert!(message.contains("/definitely/not/a/worker")),
        other => panic!("expected spawn failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_output_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let inv = shell(
        dir.path(),
        "i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done",
        Duration::from_secs(20),
    );

    let outcome = SubprocessSupervisor::new()
        .with_output_limit(100)
        .run(&inv, &CancellationToken::new())
        .await;

    assert!(outcome.exit.is_success());
    assert!(outcome.output.text.len() <= 100);
    assert!(outcome.output.truncated_bytes > 0);
    assert!(outcome.output.text.ends_with("line-1999\n"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_leader_observed_without_reaping() {
    let mut child = Command::new("sh").args(["-c", "exit 5"]).spawn().unwrap();
    let pid = child.id();

    assert!(leader_exited(pid).await);
    // Still a zombie, so its pid and group id are not yet free for reuse.
    assert!(Path::new(&format!("/proc/{}", pid.unwrap())).exists());

    let status = child.wait().await.unwrap();
    assert_eq!(exit_from_status(status), ProcessExit::Exited { code: 5 });
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_clean_exit_sweeps_stray_group_members() {
    let dir = tempfile::tempdir().unwrap();
    // The stray holds stdout open; only the sweep lets the readers finish early.
    let inv = shell(dir.path(), "sleep 30 & echo started", Duration::from_secs(20));

    let start = Instant::now();
    let outcome = SubprocessSupervisor::new()
        .with_reader_grace(Duration::from_secs(10))
        .run(&inv, &CancellationToken::new())
        .await;

    assert_eq!(outcome.exit, ProcessExit::Exited { code: 0 });
    assert!(outcome.output.text.contains("started"));
    assert!(start.elapsed() < Duration::from_secs(5));
}
