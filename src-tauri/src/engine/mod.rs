pub mod bridge;

use crate::models::{InitOptions, LogLevel, RunOptions};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePhase {
    Init,
    Run,
    Cleanup,
    Session,
    Abort,
}

impl EnginePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Run => "run",
            Self::Cleanup => "cleanup",
            Self::Session => "session",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("engine {phase} failed: {message}")]
pub struct EngineError {
    pub phase: EnginePhase,
    pub message: String,
}

impl EngineError {
    pub fn new(phase: EnginePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

/// Log sink handed to the engine at init. One method per level.
pub trait EngineLogger: Send + Sync {
    fn emit(&self, level: LogLevel, parts: Vec<serde_json::Value>);

    fn log(&self, parts: Vec<serde_json::Value>) {
        self.emit(LogLevel::Log, parts);
    }

    fn info(&self, parts: Vec<serde_json::Value>) {
        self.emit(LogLevel::Info, parts);
    }

    fn warn(&self, parts: Vec<serde_json::Value>) {
        self.emit(LogLevel::Warn, parts);
    }

    fn error(&self, parts: Vec<serde_json::Value>) {
        self.emit(LogLevel::Error, parts);
    }

    fn debug(&self, parts: Vec<serde_json::Value>) {
        self.emit(LogLevel::Debug, parts);
    }
}

/// The external automation engine.
///
/// `run` may not return for days; it repeats internally until the process is stopped.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn init(
        &self,
        options: InitOptions,
        logger: Arc<dyn EngineLogger>,
    ) -> Result<(), EngineError>;
    async fn run(&self, options: RunOptions) -> Result<(), EngineError>;
    async fn cleanup(&self) -> Result<(), EngineError>;
    async fn check_have_session(&self) -> Result<bool, EngineError>;
    async fn delete_session(&self) -> Result<(), EngineError>;

    /// Stops whatever the engine is doing. Only used when runs are cancelled in-process.
    async fn abort(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
