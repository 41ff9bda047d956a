use crate::config::BotConfig;
use crate::controller::{Collaborators, RunController, StartOutcome};
use crate::db::SqliteSettingsStore;
use crate::editor::{EditorView, SettingsEditor};
use crate::engine::bridge::ProcessEngine;
use crate::engine::Engine;
use crate::errors::{AppError, AppResult};
use crate::inhibitor::{SleepInhibitor, SystemInhibitor};
use crate::logs::{LogView, RenderedLine};
use crate::models::{Credentials, CredentialsCheck, OptionValue, SettingKey, StartRequest};
use crate::prompt::{HostProcess, Prompter};
use crate::settings::SettingsBridge;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const SETTINGS_DB_FILE: &str = "settings.sqlite3";
const DEFAULT_VIEWPORT_ROWS: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub lines: Vec<RenderedLine>,
    pub offset: usize,
    pub max_offset: usize,
}

/// Everything the front end talks to, wired from the app data directory.
pub struct BotApp {
    controller: Arc<RunController>,
    editor: Mutex<SettingsEditor>,
    view: Mutex<LogView>,
}

impl BotApp {
    /// Opens the settings database and prepares the engine sidecar. The sidecar is
    /// not launched until the engine is first called.
    pub fn open(
        data_dir: &Path,
        config: BotConfig,
        prompter: Arc<dyn Prompter>,
        host: Arc<dyn HostProcess>,
    ) -> AppResult<Self> {
        let engine: Arc<dyn Engine> = Arc::new(ProcessEngine::new(config.engine.clone()));
        let inhibitor: Arc<dyn SleepInhibitor> = Arc::new(SystemInhibitor::new());
        Self::assemble(data_dir, config, engine, inhibitor, prompter, host)
    }

    pub fn assemble(
        data_dir: &Path,
        config: BotConfig,
        engine: Arc<dyn Engine>,
        inhibitor: Arc<dyn SleepInhibitor>,
        prompter: Arc<dyn Prompter>,
        host: Arc<dyn HostProcess>,
    ) -> AppResult<Self> {
        let store = Arc::new(SqliteSettingsStore::open(&data_dir.join(SETTINGS_DB_FILE))?);
        tracing::info!(path = %store.path().display(), "settings store opened");
        let settings = Arc::new(SettingsBridge::load(store));

        let controller = Arc::new(RunController::new(
            Collaborators {
                engine,
                settings,
                inhibitor,
                prompter,
                host,
            },
            config.stop_policy,
        ));

        Ok(Self {
            view: Mutex::new(
                LogView::new(config.auto_scroll, DEFAULT_VIEWPORT_ROWS)
                    .with_clock(config.clock_format),
            ),
            controller,
            editor: Mutex::new(SettingsEditor::new()),
        })
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    pub fn settings_view(&self) -> AppResult<EditorView> {
        let snapshot = self.controller.settings().snapshot();
        Ok(self.lock_editor()?.view(&snapshot))
    }

    pub fn apply_settings_text(&self, raw: &str) -> AppResult<EditorView> {
        let settings = self.controller.settings();
        let mut editor = self.lock_editor()?;
        editor.apply_text(raw, settings);
        Ok(editor.view(&settings.snapshot()))
    }

    /// Sets one option from the form. `null` unsets it.
    pub fn set_option(&self, key: &str, value: serde_json::Value) -> AppResult<EditorView> {
        let key = SettingKey::parse(key)
            .ok_or_else(|| AppError::InvalidSettings(format!("unknown setting `{key}`")))?;
        let value = match value {
            serde_json::Value::Null => None,
            other => Some(OptionValue::from_json(&other).ok_or_else(|| {
                AppError::InvalidSettings(format!("`{key}` must be a number or boolean"))
            })?),
        };
        self.controller.settings().set_option(key, value);
        self.settings_view()
    }

    pub fn check_credentials(&self, credentials: &Credentials) -> CredentialsCheck {
        credentials.check()
    }

    pub async fn start(&self, request: StartRequest) -> StartOutcome {
        self.controller.press_start(request).await
    }

    pub fn log_page(
        &self,
        viewport_rows: Option<usize>,
        scroll_by: Option<isize>,
    ) -> AppResult<LogPage> {
        let entries = self.controller.logs().entries();
        let mut view = self
            .view
            .lock()
            .map_err(|_| AppError::Internal("log view mutex poisoned".to_string()))?;
        if let Some(rows) = viewport_rows {
            view.resize(rows);
        }
        view.sync(&entries);
        if let Some(delta) = scroll_by {
            view.scroll_by(delta);
        }
        Ok(LogPage {
            lines: view.visible().to_vec(),
            offset: view.offset(),
            max_offset: view.max_offset(),
        })
    }

    fn lock_editor(&self) -> AppResult<std::sync::MutexGuard<'_, SettingsEditor>> {
        self.editor
            .lock()
            .map_err(|_| AppError::Internal("settings editor mutex poisoned".to_string()))
    }
}
