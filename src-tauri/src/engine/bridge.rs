use super::{Engine, EngineError, EngineLogger, EnginePhase};
use crate::config::EngineCommand;
use crate::models::{InitOptions, LogLevel, RunOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};

const EXITED_MESSAGE: &str = "engine process exited";
const MAX_ENGINE_LINE_BYTES: usize = 1_000_000;

type Reply = Result<serde_json::Value, String>;
type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type SharedLogger = Arc<StdRwLock<Option<Arc<dyn EngineLogger>>>>;

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}

struct Sidecar {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
}

/// Removes a request from the pending table if the caller stops waiting for it.
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// Drives the engine as a sidecar process speaking newline-delimited JSON on stdio.
///
/// The process is spawned on first use and reused until it exits or is aborted.
pub struct ProcessEngine {
    command: EngineCommand,
    sidecar: Mutex<Option<Arc<Sidecar>>>,
    logger: SharedLogger,
    next_id: AtomicU64,
}

impl ProcessEngine {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            sidecar: Mutex::new(None),
            logger: Arc::new(StdRwLock::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    async fn live_sidecar(&self) -> Option<Arc<Sidecar>> {
        let guard = self.sidecar.lock().await;
        guard
            .as_ref()
            .filter(|sidecar| sidecar.alive.load(Ordering::SeqCst))
            .cloned()
    }

    async fn ensure_sidecar(&self, phase: EnginePhase) -> Result<Arc<Sidecar>, EngineError> {
        let mut guard = self.sidecar.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.alive.load(Ordering::SeqCst) {
                return Ok(existing.clone());
            }
        }

        let sidecar = Arc::new(self.spawn_sidecar(phase)?);
        *guard = Some(sidecar.clone());
        Ok(sidecar)
    }

    fn spawn_sidecar(&self, phase: EnginePhase) -> Result<Sidecar, EngineError> {
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.command.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.command.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|error| {
            EngineError::new(
                phase,
                format!("failed to spawn engine `{}`: {}", self.command.program, error),
            )
        })?;
        let missing =
            |stream: &str| EngineError::new(phase, format!("engine {stream} unavailable"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        tracing::info!(
            program = %self.command.program,
            pid = ?child.id(),
            "engine process started"
        );

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_stdout(stdout, pending.clone(), self.logger.clone(), alive.clone()));
        tokio::spawn(read_stderr(stderr));

        Ok(Sidecar {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            alive,
        })
    }

    async fn call(
        &self,
        phase: EnginePhase,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let sidecar = self.ensure_sidecar(phase).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (sender, receiver) = oneshot::channel();
        sidecar
            .pending
            .lock()
            .map_err(|_| EngineError::new(phase, "engine request table poisoned"))?
            .insert(id, sender);
        let _pending = PendingGuard {
            pending: sidecar.pending.clone(),
            id,
        };

        let mut line = serde_json::to_string(&Request { id, method, params })
            .map_err(|error| {
                EngineError::new(phase, format!("failed to encode request: {error}"))
            })?;
        line.push('\n');
        {
            let mut stdin = sidecar.stdin.lock().await;
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(error) = written {
                return Err(EngineError::new(phase, format!("failed to write to engine: {error}")));
            }
        }

        tracing::debug!(id, method, "engine request sent");
        match receiver.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(EngineError::new(phase, message)),
            Err(_) => Err(EngineError::new(phase, EXITED_MESSAGE)),
        }
    }

    fn set_logger(&self, logger: Arc<dyn EngineLogger>) {
        let mut slot = self
            .logger
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(logger);
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn init(
        &self,
        options: InitOptions,
        logger: Arc<dyn EngineLogger>,
    ) -> Result<(), EngineError> {
        self.set_logger(logger);
        let params = serde_json::to_value(&options)
            .map_err(|error| EngineError::new(EnginePhase::Init, error.to_string()))?;
        self.call(EnginePhase::Init, "init", params).await.map(|_| ())
    }

    async fn run(&self, options: RunOptions) -> Result<(), EngineError> {
        let params = serde_json::to_value(&options)
            .map_err(|error| EngineError::new(EnginePhase::Run, error.to_string()))?;
        self.call(EnginePhase::Run, "run", params).await.map(|_| ())
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        if self.live_sidecar().await.is_none() {
            return Ok(());
        }
        self.call(EnginePhase::Cleanup, "cleanup", serde_json::Value::Null)
            .await
            .map(|_| ())
    }

    async fn check_have_session(&self) -> Result<bool, EngineError> {
        let result = self
            .call(EnginePhase::Session, "checkHaveSession", serde_json::Value::Null)
            .await?;
        result.as_bool().ok_or_else(|| {
            EngineError::new(
                EnginePhase::Session,
                format!("expected a boolean session flag, got {result}"),
            )
        })
    }

    async fn delete_session(&self) -> Result<(), EngineError> {
        self.call(EnginePhase::Session, "deleteSession", serde_json::Value::Null)
            .await
            .map(|_| ())
    }

    async fn abort(&self) -> Result<(), EngineError> {
        let sidecar = self.sidecar.lock().await.take();
        let Some(sidecar) = sidecar else {
            return Ok(());
        };
        sidecar.alive.store(false, Ordering::SeqCst);
        let mut child = sidecar.child.lock().await;
        terminate_then_kill(&mut child).await?;
        tracing::info!("engine process aborted");
        Ok(())
    }
}

async fn terminate_then_kill(child: &mut Child) -> Result<(), EngineError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    if timeout(Duration::from_millis(1500), child.wait()).await.is_ok() {
        return Ok(());
    }

    tracing::warn!("engine process ignored SIGTERM, killing");
    child.start_kill().map_err(|error| {
        EngineError::new(EnginePhase::Abort, format!("failed to kill engine process: {error}"))
    })?;
    match timeout(Duration::from_secs(2), child.wait()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(error)) => Err(EngineError::new(
            EnginePhase::Abort,
            format!("failed to reap engine process: {error}"),
        )),
        Err(_) => Err(EngineError::new(
            EnginePhase::Abort,
            "engine process did not exit after kill",
        )),
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    pending: PendingMap,
    logger: SharedLogger,
    alive: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                if buffer.len() > MAX_ENGINE_LINE_BYTES {
                    tracing::warn!(bytes = buffer.len(), "dropping oversized engine line");
                    continue;
                }
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(line, &pending, &logger);
            }
            Err(error) => {
                tracing::warn!(error = %error, "engine stdout read failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiting caller with an error.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::info!("engine process output closed");
}

async fn read_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "engine", stream = "stderr", "{}", line),
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(error = %error, "engine stderr read failed");
                break;
            }
        }
    }
}

fn dispatch_line(line: &str, pending: &PendingMap, logger: &SharedLogger) {
    match serde_json::from_str::<Incoming>(line) {
        Ok(Incoming::Reply { id, ok, result, error }) => {
            let sender = pending.lock().ok().and_then(|mut pending| pending.remove(&id));
            let Some(sender) = sender else {
                tracing::debug!(id, "reply for unknown engine request");
                return;
            };
            let reply = if ok {
                Ok(result)
            } else {
                Err(error.unwrap_or_else(|| "engine call failed".to_string()))
            };
            let _ = sender.send(reply);
        }
        Ok(Incoming::Event { event, level, args }) if event == "log" => {
            let level = level.as_deref().and_then(LogLevel::parse).unwrap_or(LogLevel::Log);
            forward_log(logger, level, args);
        }
        Ok(Incoming::Event { event, .. }) => {
            tracing::debug!(event = %event, "ignoring engine event");
        }
        Err(_) => forward_log(
            logger,
            LogLevel::Log,
            vec![serde_json::Value::String(line.to_string())],
        ),
    }
}

fn forward_log(logger: &SharedLogger, level: LogLevel, parts: Vec<serde_json::Value>) {
    let current = logger
        .read()
        .ok()
        .and_then(|slot| slot.as_ref().cloned());
    match current {
        Some(logger) => logger.emit(level, parts),
        None => tracing::info!(target: "engine", level = level.as_str(), "{:?}", parts),
    }
}
