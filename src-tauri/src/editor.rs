use crate::models::{SettingKey, SettingsSnapshot};
use crate::settings::SettingsBridge;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingRow {
    pub key: SettingKey,
    pub value_label: String,
    pub is_set: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorView {
    pub rows: Vec<SettingRow>,
    pub text: String,
    pub valid: bool,
}

/// JSON override editor for the option set.
///
/// A successful parse replaces the committed snapshot wholesale. A failed parse keeps
/// the raw text staged so the in-progress edit survives, and leaves the snapshot alone.
#[derive(Debug, Clone)]
pub struct SettingsEditor {
    staged: Option<String>,
    valid: bool,
}

impl Default for SettingsEditor {
    fn default() -> Self {
        Self {
            staged: None,
            valid: true,
        }
    }
}

impl SettingsEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn apply_text(&mut self, raw: &str, bridge: &SettingsBridge) -> bool {
        self.staged = Some(raw.to_string());
        match parse_snapshot(raw) {
            Ok(parsed) => {
                self.valid = true;
                bridge.replace_snapshot(parsed);
                self.staged = None;
                true
            }
            Err(error) => {
                self.valid = false;
                tracing::warn!(error = %error, "settings text rejected");
                false
            }
        }
    }

    /// The staged text if an edit is pending, otherwise the committed snapshot as JSON.
    pub fn text(&self, snapshot: &SettingsSnapshot) -> String {
        match &self.staged {
            Some(staged) => staged.clone(),
            None => serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    pub fn view(&self, snapshot: &SettingsSnapshot) -> EditorView {
        EditorView {
            rows: rows(snapshot),
            text: self.text(snapshot),
            valid: self.valid,
        }
    }
}

fn parse_snapshot(raw: &str) -> Result<SettingsSnapshot, serde_json::Error> {
    // Arrays would otherwise bind positionally to the struct fields.
    match serde_json::from_str::<serde_json::Value>(raw)? {
        value @ serde_json::Value::Object(_) => serde_json::from_value(value),
        other => Err(serde::de::Error::custom(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

pub fn rows(snapshot: &SettingsSnapshot) -> Vec<SettingRow> {
    SettingKey::ALL
        .into_iter()
        .map(|key| {
            let value = snapshot.get(key);
            SettingRow {
                key,
                value_label: value.map_or_else(|| "unset".to_string(), ToString::to_string),
                is_set: value.is_some(),
                description: key.description(),
            }
        })
        .collect()
}
