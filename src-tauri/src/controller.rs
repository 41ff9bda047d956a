use crate::config::StopPolicy;
use crate::engine::{Engine, EngineError, EngineLogger};
use crate::errors::{AppError, AppResult};
use crate::inhibitor::{InhibitorGuard, SleepInhibitor};
use crate::logs::{LogBuffer, RunLogger};
use crate::models::{InitOptions, RunOptions, RunState, StartRequest};
use crate::prompt::{
    missing_usernames_notice, run_failed_notice, stop_confirmation, HostProcess, Prompter,
};
use crate::settings::SettingsBridge;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const INHIBITOR_REASON: &str = "prevent-app-suspension";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum StartOutcome {
    MissingUsernames,
    #[serde(rename_all = "camelCase")]
    Completed { run_id: String },
    #[serde(rename_all = "camelCase")]
    Failed { run_id: String, error: EngineError },
    #[serde(rename_all = "camelCase")]
    Cancelled { run_id: String },
    StopDeclined,
    StopConfirmed,
}

/// Collaborators the controller drives. All of them are injected so tests can
/// substitute doubles.
pub struct Collaborators {
    pub engine: Arc<dyn Engine>,
    pub settings: Arc<SettingsBridge>,
    pub inhibitor: Arc<dyn SleepInhibitor>,
    pub prompter: Arc<dyn Prompter>,
    pub host: Arc<dyn HostProcess>,
}

/// Sequences one bot run: precondition check, engine init and run, failure
/// remediation, and a teardown that happens exactly once per run.
///
/// Pressing start while a run is active is a stop request. By default a confirmed
/// stop terminates the host process because the engine has no cancel hook; with
/// [`StopPolicy::CancelRun`] the engine call is cancelled in-process instead.
pub struct RunController {
    engine: Arc<dyn Engine>,
    settings: Arc<SettingsBridge>,
    inhibitor: Arc<dyn SleepInhibitor>,
    prompter: Arc<dyn Prompter>,
    host: Arc<dyn HostProcess>,
    logs: LogBuffer,
    stop_policy: StopPolicy,
    state: Arc<watch::Sender<RunState>>,
    cancel: StdMutex<Option<CancellationToken>>,
    have_session: AtomicBool,
}

impl RunController {
    pub fn new(collaborators: Collaborators, stop_policy: StopPolicy) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            engine: collaborators.engine,
            settings: collaborators.settings,
            inhibitor: collaborators.inhibitor,
            prompter: collaborators.prompter,
            host: collaborators.host,
            logs: LogBuffer::new(),
            stop_policy,
            state: Arc::new(state),
            cancel: StdMutex::new(None),
            have_session: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn settings(&self) -> &Arc<SettingsBridge> {
        &self.settings
    }

    pub fn have_session(&self) -> bool {
        self.have_session.load(Ordering::SeqCst)
    }

    /// Queries the engine for a stored session and caches the answer.
    pub async fn refresh_session(&self) -> bool {
        match self.engine.check_have_session().await {
            Ok(have_session) => self.have_session.store(have_session, Ordering::SeqCst),
            Err(error) => tracing::warn!(error = %error, "session check failed"),
        }
        self.have_session()
    }

    pub async fn logout(&self) -> AppResult<bool> {
        if self.state() == RunState::Running {
            return Err(AppError::Precondition(
                "cannot log out while the bot is running".to_string(),
            ));
        }
        self.engine.delete_session().await?;
        Ok(self.refresh_session().await)
    }

    pub async fn press_start(&self, request: StartRequest) -> StartOutcome {
        if self.state() == RunState::Running {
            return self.request_stop().await;
        }
        if !self.settings.usernames_valid() {
            self.prompter.notify(missing_usernames_notice()).await;
            return StartOutcome::MissingUsernames;
        }

        // The token is in place before anyone can observe `Running`.
        let token = CancellationToken::new();
        let entered = self.state.send_if_modified(|state| {
            if *state == RunState::Idle {
                *self.lock_cancel() = Some(token.clone());
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        if !entered {
            return self.request_stop().await;
        }
        self.logs.clear();

        let run_id = Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, "run started");

        let teardown = RunTeardown {
            run_id: run_id.clone(),
            state: self.state.clone(),
            engine: self.engine.clone(),
            inhibitor: Some(InhibitorGuard::acquire(self.inhibitor.clone(), INHIBITOR_REASON)),
            finished: false,
        };

        let logger: Arc<dyn EngineLogger> =
            Arc::new(RunLogger::new(run_id.clone(), self.logs.clone()));
        let result = tokio::select! {
            result = self.drive(request, logger.clone()) => Some(result),
            _ = token.cancelled() => None,
        };

        let outcome = match result {
            Some(Ok(())) => {
                tracing::info!(run_id = %run_id, "run completed");
                StartOutcome::Completed { run_id }
            }
            Some(Err(error)) => {
                tracing::error!(
                    run_id = %run_id,
                    phase = %error.phase,
                    error = %error,
                    "run failed"
                );
                logger.error(vec![serde_json::Value::String(error.to_string())]);
                self.prompter.notify(run_failed_notice()).await;
                self.force_logout().await;
                StartOutcome::Failed { run_id, error }
            }
            None => {
                tracing::info!(run_id = %run_id, "run cancelled");
                if let Err(error) = self.engine.abort().await {
                    tracing::warn!(run_id = %run_id, error = %error, "engine abort failed");
                }
                StartOutcome::Cancelled { run_id }
            }
        };

        self.lock_cancel().take();
        teardown.finish().await;
        outcome
    }

    async fn drive(
        &self,
        request: StartRequest,
        logger: Arc<dyn EngineLogger>,
    ) -> Result<(), EngineError> {
        let snapshot = self.settings.snapshot();
        let run_options = RunOptions {
            usernames: self.settings.normalized_usernames(),
            age_in_days: snapshot.dont_unfollow_until_days_elapsed.clone(),
            max_follows_per_user: snapshot.max_follows_per_user.clone(),
            skip_private: self.settings.skip_private(),
            run_at_hour: snapshot.run_at_hour.clone(),
        };
        let init_options = InitOptions {
            settings: snapshot,
            exclude_users: Vec::new(),
            dry_run: request.dry_run,
            credentials: request.credentials,
        };

        self.engine.init(init_options, logger).await?;
        self.engine.run(run_options).await
    }

    async fn request_stop(&self) -> StartOutcome {
        if !self.prompter.confirm(stop_confirmation()).await {
            return StartOutcome::StopDeclined;
        }

        match self.stop_policy {
            StopPolicy::TerminateProcess => {
                tracing::warn!("stop confirmed, terminating host process");
                self.host.terminate();
            }
            StopPolicy::CancelRun => {
                tracing::info!("stop confirmed, cancelling run");
                if let Some(token) = self.lock_cancel().as_ref() {
                    token.cancel();
                }
            }
        }
        StartOutcome::StopConfirmed
    }

    async fn force_logout(&self) {
        if let Err(error) = self.engine.delete_session().await {
            tracing::warn!(error = %error, "forced logout failed");
        }
        self.refresh_session().await;
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns the controller to idle, cleans up the engine and releases the inhibitor.
///
/// `finish` does this in order; if the run future is dropped first, `Drop` does it
/// with the cleanup spawned onto the runtime.
struct RunTeardown {
    run_id: String,
    state: Arc<watch::Sender<RunState>>,
    engine: Arc<dyn Engine>,
    inhibitor: Option<InhibitorGuard>,
    finished: bool,
}

impl RunTeardown {
    async fn finish(mut self) {
        self.finished = true;
        self.state.send_replace(RunState::Idle);
        if let Err(error) = self.engine.cleanup().await {
            tracing::warn!(run_id = %self.run_id, error = %error, "engine cleanup failed");
        }
        if let Some(inhibitor) = self.inhibitor.take() {
            inhibitor.release();
        }
    }
}

impl Drop for RunTeardown {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(run_id = %self.run_id, "run dropped before teardown");
        self.state.send_replace(RunState::Idle);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.engine.clone();
                let run_id = self.run_id.clone();
                handle.spawn(async move {
                    if let Err(error) = engine.cleanup().await {
                        tracing::warn!(run_id = %run_id, error = %error, "engine cleanup failed");
                    }
                });
            }
            Err(_) => tracing::warn!(run_id = %self.run_id, "no runtime left for engine cleanup"),
        }
    }
}
