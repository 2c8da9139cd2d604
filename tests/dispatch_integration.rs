//! Batch dispatch against real `sh` processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use slicekit::dispatch::{BatchDispatcher, Task, TaskState};
use slicekit::subprocess::{ProcessCommand, TokioProcessRunner};
use tempfile::TempDir;

fn dispatcher(dir: &TempDir) -> BatchDispatcher {
    BatchDispatcher::new(Arc::new(TokioProcessRunner), false)
        .with_log_dir(dir.path())
        .with_progress_interval(Duration::from_millis(100))
}

fn task(id: &str, script: &str) -> Task {
    Task::new(id, ProcessCommand::shell(script))
}

#[tokio::test]
async fn test_failure_terminates_sibling_and_skips_later_chunks() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("later-chunk-ran");
    let tasks = vec![
        task("fails", "sleep 0.2; exit 3"),
        task("sleeper", "sleep 30"),
        task("later", &format!("touch {}", marker.display())),
    ];

    let started = Instant::now();
    let result = dispatcher(&dir).run_batch("integration", tasks, 2).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(result.max_exit_code, 3);
    assert_eq!(result.dispatched_chunks, 1);
    assert!(!marker.exists());

    let sleeper = result.results.iter().find(|r| r.task_id == "sleeper").unwrap();
    assert_eq!(sleeper.state, TaskState::Terminated);
}

#[tokio::test]
async fn test_successful_batch_writes_task_logs() {
    let dir = TempDir::new().unwrap();
    let tasks = vec![
        task("first", "echo first-output"),
        task("second", "echo second-output >&2"),
        task("third", "true"),
    ];

    let result = dispatcher(&dir).run_batch("integration", tasks, 2).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.dispatched_chunks, 2);
    let log = |id: &str| {
        let entry = result.results.iter().find(|r| r.task_id == id).unwrap();
        std::fs::read_to_string(entry.log.as_ref().unwrap()).unwrap()
    };
    assert!(log("first").contains("first-output"));
    assert!(log("second").contains("second-output"));
}

#[tokio::test]
async fn test_self_exited_failures_keep_their_exit_codes() {
    for run in 0..10 {
        let dir = TempDir::new().unwrap();
        let script = |name: &str, code: i32| {
            let base = dir.path().join(name);
            format!(
                "trap 'touch {b}-got-sigterm; exit 143' TERM; sleep 0.1; touch {b}-done; exit {code}",
                b = base.display()
            )
        };
        let tasks = vec![task("a", &script("a", 3)), task("b", &script("b", 7))];

        let result = dispatcher(&dir).run_batch("integration", tasks, 2).await.unwrap();

        let mut own_exits = Vec::new();
        for (name, code) in [("a", 3), ("b", 7)] {
            let done = dir.path().join(format!("{name}-done")).exists();
            let signalled = dir.path().join(format!("{name}-got-sigterm")).exists();
            let entry = result.results.iter().find(|r| r.task_id == name).unwrap();
            if done && !signalled {
                assert_eq!(entry.state, TaskState::Failed, "run {run}: task {name}");
                assert_eq!(entry.exit_code, code, "run {run}: task {name}");
                own_exits.push(code);
            }
        }
        assert_eq!(
            result.max_exit_code,
            own_exits.into_iter().max().unwrap(),
            "run {run}"
        );
    }
}
