#![cfg(unix)]

use simple_insta_bot_lib::config::{EngineCommand, StopPolicy};
use simple_insta_bot_lib::controller::{Collaborators, RunController, StartOutcome};
use simple_insta_bot_lib::engine::bridge::ProcessEngine;
use simple_insta_bot_lib::engine::{Engine, EnginePhase};
use simple_insta_bot_lib::inhibitor::SleepInhibitor;
use simple_insta_bot_lib::logs::{LogBuffer, RunLogger};
use simple_insta_bot_lib::models::{
    Credentials, InitOptions, LogLevel, RunOptions, RunState, SettingsSnapshot, StartRequest,
};
use simple_insta_bot_lib::prompt::{ExitHost, TracingPrompter};
use simple_insta_bot_lib::settings::SettingsBridge;
use simple_insta_bot_lib::store::MemorySettingsStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/mock-engine.sh")
}

fn mock_engine(state_file: &Path) -> ProcessEngine {
    let mut env = BTreeMap::new();
    env.insert(
        "MOCK_ENGINE_STATE".to_string(),
        state_file.to_string_lossy().to_string(),
    );
    ProcessEngine::new(EngineCommand {
        program: "bash".to_string(),
        args: vec![fixture().to_string_lossy().to_string()],
        env,
        cwd: None,
    })
}

fn init_options(password: &str) -> InitOptions {
    InitOptions {
        settings: SettingsSnapshot::default(),
        exclude_users: Vec::new(),
        dry_run: true,
        credentials: Credentials {
            username: "me".to_string(),
            password: password.to_string(),
        },
    }
}

fn run_options(usernames: &[&str]) -> RunOptions {
    RunOptions {
        usernames: usernames.iter().map(|user| user.to_string()).collect(),
        age_in_days: None,
        max_follows_per_user: None,
        skip_private: false,
        run_at_hour: None,
    }
}

#[test]
fn fixture_script_exists() {
    assert!(fixture().exists());
}

#[tokio::test]
async fn session_and_run_round_trip_through_the_sidecar() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = mock_engine(&dir.path().join("session"));
    let buffer = LogBuffer::new();

    assert!(!engine.check_have_session().await.expect("session check"));

    engine
        .init(init_options("secret"), Arc::new(RunLogger::new("it-run", buffer.clone())))
        .await
        .expect("init");
    assert!(engine.check_have_session().await.expect("session check"));

    engine.run(run_options(&["alice", "bob"])).await.expect("run");
    engine.cleanup().await.expect("cleanup");

    let messages = buffer.entries().iter().map(|entry| entry.message()).collect::<Vec<_>>();
    assert_eq!(
        messages,
        vec!["logging in as me", "browser launched", r#"run ["alice","bob"]"#]
    );

    engine.delete_session().await.expect("delete session");
    assert!(!engine.check_have_session().await.expect("session check"));
}

#[tokio::test]
async fn engine_errors_carry_their_phase() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = mock_engine(&dir.path().join("session"));
    let buffer = LogBuffer::new();

    let error = engine
        .init(init_options("bad"), Arc::new(RunLogger::new("it-run", buffer.clone())))
        .await
        .expect_err("init should fail");
    assert_eq!(error.phase, EnginePhase::Init);
    assert_eq!(error.message, "Login failed");

    let last = buffer.entries().last().cloned().expect("log entry");
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.message(), "login rejected");
}

#[tokio::test]
async fn process_exit_fails_the_pending_call_and_respawns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = mock_engine(&dir.path().join("session"));

    let error = engine
        .run(run_options(&["crash"]))
        .await
        .expect_err("run should fail");
    assert_eq!(error.phase, EnginePhase::Run);
    assert_eq!(error.message, "engine process exited");

    assert!(!engine.check_have_session().await.expect("respawned session check"));
}

#[tokio::test]
async fn abort_ends_a_long_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(mock_engine(&dir.path().join("session")));

    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(run_options(&["slow"])).await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    engine.abort().await.expect("abort");
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run should end")
        .expect("run task");
    let error = result.expect_err("aborted run fails");
    assert_eq!(error.message, "engine process exited");

    engine.cleanup().await.expect("cleanup without a sidecar");
}

#[tokio::test]
async fn abort_kills_an_engine_that_ignores_sigterm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(mock_engine(&dir.path().join("session")));

    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(run_options(&["stubborn"])).await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = std::time::Instant::now();
    engine.abort().await.expect("abort escalates to kill");
    assert!(started.elapsed() >= Duration::from_millis(1500));

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run should end")
        .expect("run task");
    assert_eq!(result.expect_err("killed run fails").message, "engine process exited");
}

#[derive(Default)]
struct Counting {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl SleepInhibitor for Counting {
    fn acquire(&self, _reason: &str) -> u64 {
        self.acquired.fetch_add(1, Ordering::SeqCst) as u64
    }

    fn release(&self, _id: u64) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn controller(state_file: &Path, usernames: &[&str]) -> (RunController, Arc<Counting>) {
    let settings = Arc::new(SettingsBridge::load(Arc::new(MemorySettingsStore::new())));
    settings.set_usernames(usernames.iter().map(|user| user.to_string()).collect());
    let inhibitor = Arc::new(Counting::default());
    let controller = RunController::new(
        Collaborators {
            engine: Arc::new(mock_engine(state_file)),
            settings,
            inhibitor: inhibitor.clone(),
            prompter: Arc::new(TracingPrompter),
            host: Arc::new(ExitHost),
        },
        StopPolicy::TerminateProcess,
    );
    (controller, inhibitor)
}

#[tokio::test]
async fn controller_completes_a_run_against_the_sidecar() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (controller, inhibitor) = controller(&dir.path().join("session"), &["@alice", "bob"]);

    let outcome = controller
        .press_start(StartRequest {
            credentials: Credentials {
                username: "me".to_string(),
                password: "secret".to_string(),
            },
            dry_run: true,
        })
        .await;

    assert!(matches!(outcome, StartOutcome::Completed { .. }));
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(inhibitor.released.load(Ordering::SeqCst), 1);
    let last = controller.logs().entries().last().cloned().expect("log entry");
    assert_eq!(last.message(), r#"run ["alice","bob"]"#);
}

#[tokio::test]
async fn controller_logs_out_after_a_failed_login() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_file = dir.path().join("session");
    std::fs::write(&state_file, "").expect("seed session");
    let (controller, inhibitor) = controller(&state_file, &["alice"]);
    assert!(controller.refresh_session().await);

    let outcome = controller
        .press_start(StartRequest {
            credentials: Credentials {
                username: "me".to_string(),
                password: "bad".to_string(),
            },
            dry_run: false,
        })
        .await;

    match outcome {
        StartOutcome::Failed { error, .. } => assert_eq!(error.phase, EnginePhase::Init),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!controller.have_session());
    assert!(!state_file.exists());
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(inhibitor.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(inhibitor.released.load(Ordering::SeqCst), 1);

    let last = controller.logs().entries().last().cloned().expect("log entry");
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message().contains("Login failed"));
}
