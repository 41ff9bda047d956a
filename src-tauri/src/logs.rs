use crate::config::{AutoScroll, ClockFormat};
use crate::engine::EngineLogger;
use crate::models::{LogEntry, LogLevel, Tone};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const LOG_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "entry", rename_all = "kebab-case")]
pub enum LogEvent {
    Appended(LogEntry),
    Cleared,
}

/// Append-only log of the current run. Cloning shares the same buffer.
#[derive(Clone)]
pub struct LogBuffer {
    entries: Arc<RwLock<Vec<LogEntry>>>,
    events: broadcast::Sender<LogEvent>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LOG_EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    pub fn append(&self, level: LogLevel, parts: Vec<serde_json::Value>) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            parts,
        };
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        let _ = self.events.send(LogEvent::Appended(entry.clone()));
        entry
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        let _ = self.events.send(LogEvent::Cleared);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }
}

/// Logger handed to the engine for one run: every line goes to tracing and the buffer.
pub struct RunLogger {
    run_id: String,
    buffer: LogBuffer,
}

impl RunLogger {
    pub fn new(run_id: impl Into<String>, buffer: LogBuffer) -> Self {
        Self {
            run_id: run_id.into(),
            buffer,
        }
    }
}

impl EngineLogger for RunLogger {
    fn emit(&self, level: LogLevel, parts: Vec<serde_json::Value>) {
        let entry = self.buffer.append(level, parts);
        let message = entry.message();
        let run_id = self.run_id.as_str();
        match level {
            LogLevel::Error => tracing::error!(target: "engine", run_id, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "engine", run_id, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "engine", run_id, "{}", message),
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(target: "engine", run_id, "{}", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedLine {
    pub time: String,
    pub text: String,
    pub tone: Tone,
}

/// Headless scrolling view over the log buffer.
#[derive(Debug, Clone)]
pub struct LogView {
    policy: AutoScroll,
    clock: ClockFormat,
    viewport_rows: usize,
    lines: Vec<RenderedLine>,
    offset: usize,
    follow_tail: bool,
}

impl LogView {
    pub fn new(policy: AutoScroll, viewport_rows: usize) -> Self {
        Self {
            policy,
            clock: ClockFormat::default(),
            viewport_rows: viewport_rows.max(1),
            lines: Vec::new(),
            offset: 0,
            follow_tail: true,
        }
    }

    pub fn with_clock(mut self, clock: ClockFormat) -> Self {
        self.clock = clock;
        self
    }

    pub fn sync(&mut self, entries: &[LogEntry]) {
        self.lines = entries
            .iter()
            .map(|entry| render_line(entry, self.clock))
            .collect();
        let pin = match self.policy {
            AutoScroll::Always => true,
            AutoScroll::FollowTail => self.follow_tail,
        };
        if pin {
            self.offset = self.max_offset();
            self.follow_tail = true;
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let target = if delta.is_negative() {
            self.offset.saturating_sub(delta.unsigned_abs())
        } else {
            self.offset.saturating_add(delta.unsigned_abs())
        };
        self.offset = target.min(self.max_offset());
        self.follow_tail = self.offset == self.max_offset();
    }

    pub fn resize(&mut self, viewport_rows: usize) {
        let at_bottom = self.offset == self.max_offset();
        self.viewport_rows = viewport_rows.max(1);
        self.offset = if at_bottom {
            self.max_offset()
        } else {
            self.offset.min(self.max_offset())
        };
    }

    pub fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.viewport_rows)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn lines(&self) -> &[RenderedLine] {
        &self.lines
    }

    pub fn visible(&self) -> &[RenderedLine] {
        let end = (self.offset + self.viewport_rows).min(self.lines.len());
        &self.lines[self.offset..end]
    }
}

fn render_line(entry: &LogEntry, clock: ClockFormat) -> RenderedLine {
    RenderedLine {
        time: entry.time_label(clock),
        text: entry.message(),
        tone: entry.level.tone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{LogBuffer, LogEvent, LogView, RunLogger};
    use crate::config::{AutoScroll, ClockFormat};
    use crate::engine::EngineLogger;
    use crate::models::{LogLevel, Tone};
    use serde_json::json;

    #[test]
    fn entries_keep_insertion_order_until_cleared() {
        let buffer = LogBuffer::new();
        buffer.append(LogLevel::Info, vec![json!("first")]);
        buffer.append(LogLevel::Warn, vec![json!("second")]);

        let messages = buffer.entries().iter().map(|e| e.message()).collect::<Vec<_>>();
        assert_eq!(messages, vec!["first", "second"]);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_appends_and_clears() {
        let buffer = LogBuffer::new();
        let mut events = buffer.subscribe();

        let entry = buffer.append(LogLevel::Error, vec![json!("boom")]);
        buffer.clear();

        assert_eq!(events.recv().await.expect("append"), LogEvent::Appended(entry));
        assert_eq!(events.recv().await.expect("clear"), LogEvent::Cleared);
    }

    #[test]
    fn run_logger_fills_the_shared_buffer() {
        let buffer = LogBuffer::new();
        let logger = RunLogger::new("run-1", buffer.clone());

        logger.log(vec![json!("log")]);
        logger.info(vec![json!("info")]);
        logger.warn(vec![json!("warn")]);
        logger.error(vec![json!("error")]);
        logger.debug(vec![json!("debug")]);

        let levels = buffer.entries().iter().map(|e| e.level).collect::<Vec<_>>();
        assert_eq!(
            levels,
            vec![LogLevel::Log, LogLevel::Info, LogLevel::Warn, LogLevel::Error, LogLevel::Debug]
        );
    }

    fn filled(buffer: &LogBuffer, count: usize) {
        for index in 0..count {
            buffer.append(LogLevel::Log, vec![json!(format!("line {index}"))]);
        }
    }

    #[test]
    fn always_policy_pins_to_bottom_after_scrolling_up() {
        let buffer = LogBuffer::new();
        filled(&buffer, 10);
        let mut view = LogView::new(AutoScroll::Always, 4);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), 6);

        view.scroll_by(-5);
        assert_eq!(view.offset(), 1);

        buffer.append(LogLevel::Warn, vec![json!("newest")]);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), 7);
        let last = view.visible().last().expect("visible line");
        assert_eq!(last.text, "newest");
        assert_eq!(last.tone, Tone::Warning);
    }

    #[test]
    fn follow_tail_policy_respects_manual_scroll() {
        let buffer = LogBuffer::new();
        filled(&buffer, 10);
        let mut view = LogView::new(AutoScroll::FollowTail, 4);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), 6);

        view.scroll_by(-3);
        buffer.append(LogLevel::Log, vec![json!("more")]);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), 3);

        view.scroll_by(100);
        assert_eq!(view.offset(), view.max_offset());
        buffer.append(LogLevel::Log, vec![json!("again")]);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), view.max_offset());
    }

    #[test]
    fn time_labels_follow_the_clock_format() {
        let buffer = LogBuffer::new();
        filled(&buffer, 1);
        let twelve = regex::Regex::new(r"^\d{1,2}:\d{2} (AM|PM)$").expect("regex");
        let twenty_four = regex::Regex::new(r"^\d{2}:\d{2}$").expect("regex");

        let mut view = LogView::new(AutoScroll::Always, 4);
        view.sync(&buffer.entries());
        let label = &view.visible()[0].time;
        assert!(twelve.is_match(label), "{label}");

        let mut view = LogView::new(AutoScroll::Always, 4).with_clock(ClockFormat::TwentyFourHour);
        view.sync(&buffer.entries());
        let label = &view.visible()[0].time;
        assert!(twenty_four.is_match(label), "{label}");
    }

    #[test]
    fn short_logs_fit_without_scrolling() {
        let buffer = LogBuffer::new();
        filled(&buffer, 2);
        let mut view = LogView::new(AutoScroll::Always, 4);
        view.sync(&buffer.entries());
        assert_eq!(view.offset(), 0);
        assert_eq!(view.visible().len(), 2);

        view.resize(1);
        assert_eq!(view.offset(), 1);
    }
}
