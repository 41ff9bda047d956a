use crate::models::{Confirmation, Notice, NoticeKind};
use async_trait::async_trait;

/// User-facing dialogs. `notify` resolves once the notice has been dismissed.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn notify(&self, notice: Notice);
    async fn confirm(&self, request: Confirmation) -> bool;
}

/// The application process hosting the controller.
pub trait HostProcess: Send + Sync {
    fn terminate(&self);
}

/// Prompter for headless use: notices go to the log and confirmations are declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPrompter;

#[async_trait]
impl Prompter for TracingPrompter {
    async fn notify(&self, notice: Notice) {
        let title = notice.title.as_deref().unwrap_or("");
        match notice.kind {
            NoticeKind::Error => tracing::error!(title, "{}", notice.text),
            NoticeKind::Warning => tracing::warn!(title, "{}", notice.text),
            NoticeKind::Info => tracing::info!(title, "{}", notice.text),
        }
    }

    async fn confirm(&self, request: Confirmation) -> bool {
        tracing::info!(
            title = %request.title,
            "declining confirmation without an interactive prompt"
        );
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExitHost;

impl HostProcess for ExitHost {
    fn terminate(&self) {
        tracing::info!("terminating host process");
        std::process::exit(0);
    }
}

pub fn missing_usernames_notice() -> Notice {
    Notice {
        kind: NoticeKind::Info,
        title: None,
        text: "Please add at least 1 username to the list!".to_string(),
    }
}

pub fn run_failed_notice() -> Notice {
    Notice {
        kind: NoticeKind::Error,
        title: Some("Failed to run".to_string()),
        text: "Check logs, then try to log out and log back in or restart the app.".to_string(),
    }
}

pub fn stop_confirmation() -> Confirmation {
    Confirmation {
        title: "Are you sure?".to_string(),
        text: "This will terminate the bot and you will lose any logs".to_string(),
        confirm_label: "Stop the bot".to_string(),
        cancel_label: "Leave it running".to_string(),
    }
}
