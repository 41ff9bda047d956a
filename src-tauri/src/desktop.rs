use crate::app::{BotApp, LogPage};
use crate::config::BotConfig;
use crate::controller::StartOutcome;
use crate::editor::EditorView;
use crate::errors::AppResult;
use crate::logs::LogEvent;
use crate::models::{
    BooleanResponse, Confirmation, Credentials, CredentialsCheck, Notice, NoticeKind,
    StartRequest,
};
use crate::prompt::{HostProcess, Prompter};
use async_trait::async_trait;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tokio::sync::{broadcast, oneshot};

#[derive(Clone)]
struct AppState {
    app: Arc<BotApp>,
}

struct DialogPrompter {
    handle: AppHandle,
}

#[async_trait]
impl Prompter for DialogPrompter {
    async fn notify(&self, notice: Notice) {
        let kind = match notice.kind {
            NoticeKind::Info => MessageDialogKind::Info,
            NoticeKind::Warning => MessageDialogKind::Warning,
            NoticeKind::Error => MessageDialogKind::Error,
        };
        let mut dialog = self.handle.dialog().message(notice.text).kind(kind);
        if let Some(title) = notice.title {
            dialog = dialog.title(title);
        }

        let (tx, rx) = oneshot::channel();
        dialog.show(move |_| {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    async fn confirm(&self, request: Confirmation) -> bool {
        let (tx, rx) = oneshot::channel();
        self.handle
            .dialog()
            .message(request.text)
            .title(request.title)
            .kind(MessageDialogKind::Warning)
            .buttons(MessageDialogButtons::OkCancelCustom(
                request.confirm_label,
                request.cancel_label,
            ))
            .show(move |confirmed| {
                let _ = tx.send(confirmed);
            });
        rx.await.unwrap_or(false)
    }
}

struct AppExitHost {
    handle: AppHandle,
}

impl HostProcess for AppExitHost {
    fn terminate(&self) {
        tracing::info!("exiting application");
        self.handle.exit(0);
    }
}

#[tauri::command]
fn get_settings_view(state: tauri::State<'_, AppState>) -> Result<EditorView, String> {
    state.app.settings_view().map_err(to_client_error)
}

#[tauri::command]
fn apply_settings_text(
    state: tauri::State<'_, AppState>,
    text: String,
) -> Result<EditorView, String> {
    state.app.apply_settings_text(&text).map_err(to_client_error)
}

#[tauri::command]
fn set_option(
    state: tauri::State<'_, AppState>,
    key: String,
    value: serde_json::Value,
) -> Result<EditorView, String> {
    state.app.set_option(&key, value).map_err(to_client_error)
}

#[tauri::command]
fn set_usernames(state: tauri::State<'_, AppState>, usernames: Vec<String>) -> Vec<String> {
    let settings = state.app.controller().settings();
    settings.set_usernames(usernames);
    settings.usernames()
}

#[tauri::command]
fn add_usernames(state: tauri::State<'_, AppState>, raw: String) -> Vec<String> {
    state.app.controller().settings().add_usernames(&raw)
}

#[tauri::command]
fn set_skip_private(state: tauri::State<'_, AppState>, skip_private: bool) -> BooleanResponse {
    state.app.controller().settings().set_skip_private(skip_private);
    BooleanResponse { success: true }
}

#[tauri::command]
async fn start_bot(
    state: tauri::State<'_, AppState>,
    request: StartRequest,
) -> Result<StartOutcome, String> {
    let app = state.app.clone();
    Ok(app.start(request).await)
}

#[tauri::command]
async fn logout(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    let app = state.app.clone();
    app.controller().logout().await.map_err(to_client_error)
}

#[tauri::command]
async fn have_session(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    let app = state.app.clone();
    Ok(app.controller().refresh_session().await)
}

#[tauri::command]
fn get_logs(
    state: tauri::State<'_, AppState>,
    viewport_rows: Option<usize>,
    scroll_by: Option<isize>,
) -> Result<LogPage, String> {
    state.app.log_page(viewport_rows, scroll_by).map_err(to_client_error)
}

#[tauri::command]
fn check_credentials(
    state: tauri::State<'_, AppState>,
    credentials: Credentials,
) -> CredentialsCheck {
    state.app.check_credentials(&credentials)
}

pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|error| error.to_string())?;
            std::fs::create_dir_all(&app_data_dir).map_err(|error| error.to_string())?;
            let config = BotConfig::load_or_create(&BotConfig::path_in(&app_data_dir))
                .map_err(|error| format!("{error:#}"))?;
            crate::init_tracing(&app_data_dir, &config.log_filter)?;

            let handle = app.handle().clone();
            let bot =
                Arc::new(open_bot(&app_data_dir, config, &handle).map_err(to_client_error)?);

            tauri::async_runtime::spawn(forward_logs(bot.clone(), handle.clone()));
            tauri::async_runtime::spawn(forward_run_state(bot.clone(), handle));
            tauri::async_runtime::spawn({
                let bot = bot.clone();
                async move {
                    bot.controller().refresh_session().await;
                }
            });

            app.manage(AppState { app: bot });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_settings_view,
            apply_settings_text,
            set_option,
            set_usernames,
            add_usernames,
            set_skip_private,
            start_bot,
            logout,
            have_session,
            get_logs,
            check_credentials
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}

fn open_bot(
    data_dir: &std::path::Path,
    config: BotConfig,
    handle: &AppHandle,
) -> AppResult<BotApp> {
    BotApp::open(
        data_dir,
        config,
        Arc::new(DialogPrompter { handle: handle.clone() }),
        Arc::new(AppExitHost { handle: handle.clone() }),
    )
}

async fn forward_logs(bot: Arc<BotApp>, handle: AppHandle) {
    let mut events = bot.controller().logs().subscribe();
    loop {
        match events.recv().await {
            Ok(event) => emit(&handle, "log_event", &event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "log forwarder lagged, resending buffer");
                emit(&handle, "log_event", &LogEvent::Cleared);
                for entry in bot.controller().logs().entries() {
                    emit(&handle, "log_event", &LogEvent::Appended(entry));
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_run_state(bot: Arc<BotApp>, handle: AppHandle) {
    let mut state = bot.controller().subscribe_state();
    loop {
        let current = *state.borrow_and_update();
        emit(&handle, "run_state", &current);
        if state.changed().await.is_err() {
            break;
        }
    }
}

fn emit<S: serde::Serialize + Clone>(handle: &AppHandle, event: &str, payload: &S) {
    if let Err(error) = handle.emit(event, payload.clone()) {
        tracing::warn!(event, error = %error, "failed to emit event");
    }
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
