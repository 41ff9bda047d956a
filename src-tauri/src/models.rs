use crate::config::ClockFormat;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SKIP_PRIVATE_KEY: &str = "skipPrivate";
pub const USERNAMES_KEY: &str = "usersToFollowFollowersOf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    MaxFollowsPerDay,
    MaxFollowsPerHour,
    FollowUserRatioMin,
    FollowUserRatioMax,
    FollowUserMaxFollowers,
    FollowUserMaxFollowing,
    FollowUserMinFollowers,
    FollowUserMinFollowing,
    DontUnfollowUntilDaysElapsed,
    MaxFollowsPerUser,
    RunAtHour,
}

impl SettingKey {
    pub const ALL: [SettingKey; 11] = [
        Self::MaxFollowsPerDay,
        Self::MaxFollowsPerHour,
        Self::FollowUserRatioMin,
        Self::FollowUserRatioMax,
        Self::FollowUserMaxFollowers,
        Self::FollowUserMaxFollowing,
        Self::FollowUserMinFollowers,
        Self::FollowUserMinFollowing,
        Self::DontUnfollowUntilDaysElapsed,
        Self::MaxFollowsPerUser,
        Self::RunAtHour,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxFollowsPerDay => "maxFollowsPerDay",
            Self::MaxFollowsPerHour => "maxFollowsPerHour",
            Self::FollowUserRatioMin => "followUserRatioMin",
            Self::FollowUserRatioMax => "followUserRatioMax",
            Self::FollowUserMaxFollowers => "followUserMaxFollowers",
            Self::FollowUserMaxFollowing => "followUserMaxFollowing",
            Self::FollowUserMinFollowers => "followUserMinFollowers",
            Self::FollowUserMinFollowing => "followUserMinFollowing",
            Self::DontUnfollowUntilDaysElapsed => "dontUnfollowUntilDaysElapsed",
            Self::MaxFollowsPerUser => "maxFollowsPerUser",
            Self::RunAtHour => "runAtHour",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == raw)
    }

    /// Human readable explanation shown next to the option in the settings panel.
    pub fn description(self) -> &'static str {
        match self {
            Self::DontUnfollowUntilDaysElapsed => {
                "Don't unfollow already followed users until the number of days have passed"
            }
            Self::FollowUserMinFollowing => "Don't follow users who follow less people than this",
            Self::FollowUserMinFollowers => "Don't follow users who have less followers than this",
            Self::FollowUserMaxFollowers => "Don't follow users who have more followers than this",
            Self::FollowUserMaxFollowing => "Don't follow users who are following more than this",
            Self::FollowUserRatioMin => {
                "Don't follow users that have a followers / following ratio lower than this"
            }
            Self::FollowUserRatioMax => {
                "Don't follow users that have a followers / following ratio higher than this"
            }
            Self::MaxFollowsPerHour => {
                "Global limit that prevents follow or unfollows (total) to exceed this number over a sliding window of one hour. NOTE setting this too high will cause temp ban/throttle"
            }
            Self::MaxFollowsPerDay => {
                "Global limit that prevents follow or unfollows (total) to exceed this number over a sliding window of 24h. NOTE setting this too high will cause temp ban/throttle"
            }
            Self::MaxFollowsPerUser => "How many of each celeb user's followers to follow",
            Self::RunAtHour => "Repeat at this hour (24hr based) every day",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single option value. JSON numbers keep their integer or float form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(serde_json::Number),
}

impl OptionValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Number(number) => serde_json::Value::Number(number.clone()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(value) => Some(Self::Bool(*value)),
            serde_json::Value::Number(number) => Some(Self::Number(number.clone())),
            _ => None,
        }
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// The committed option set. Unset fields mean "use the engine default" and are
/// omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_follows_per_day: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_follows_per_hour: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_ratio_min: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_ratio_max: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_max_followers: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_max_following: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_min_followers: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_user_min_following: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dont_unfollow_until_days_elapsed: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_follows_per_user: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at_hour: Option<OptionValue>,
}

impl SettingsSnapshot {
    pub fn get(&self, key: SettingKey) -> Option<&OptionValue> {
        self.slot(key).as_ref()
    }

    pub fn set(&mut self, key: SettingKey, value: Option<OptionValue>) {
        *self.slot_mut(key) = value;
    }

    fn slot(&self, key: SettingKey) -> &Option<OptionValue> {
        match key {
            SettingKey::MaxFollowsPerDay => &self.max_follows_per_day,
            SettingKey::MaxFollowsPerHour => &self.max_follows_per_hour,
            SettingKey::FollowUserRatioMin => &self.follow_user_ratio_min,
            SettingKey::FollowUserRatioMax => &self.follow_user_ratio_max,
            SettingKey::FollowUserMaxFollowers => &self.follow_user_max_followers,
            SettingKey::FollowUserMaxFollowing => &self.follow_user_max_following,
            SettingKey::FollowUserMinFollowers => &self.follow_user_min_followers,
            SettingKey::FollowUserMinFollowing => &self.follow_user_min_following,
            SettingKey::DontUnfollowUntilDaysElapsed => &self.dont_unfollow_until_days_elapsed,
            SettingKey::MaxFollowsPerUser => &self.max_follows_per_user,
            SettingKey::RunAtHour => &self.run_at_hour,
        }
    }

    fn slot_mut(&mut self, key: SettingKey) -> &mut Option<OptionValue> {
        match key {
            SettingKey::MaxFollowsPerDay => &mut self.max_follows_per_day,
            SettingKey::MaxFollowsPerHour => &mut self.max_follows_per_hour,
            SettingKey::FollowUserRatioMin => &mut self.follow_user_ratio_min,
            SettingKey::FollowUserRatioMax => &mut self.follow_user_ratio_max,
            SettingKey::FollowUserMaxFollowers => &mut self.follow_user_max_followers,
            SettingKey::FollowUserMaxFollowing => &mut self.follow_user_max_following,
            SettingKey::FollowUserMinFollowers => &mut self.follow_user_min_followers,
            SettingKey::FollowUserMinFollowing => &mut self.follow_user_min_following,
            SettingKey::DontUnfollowUntilDaysElapsed => &mut self.dont_unfollow_until_days_elapsed,
            SettingKey::MaxFollowsPerUser => &mut self.max_follows_per_user,
            SettingKey::RunAtHour => &mut self.run_at_hour,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn check(&self) -> CredentialsCheck {
        CredentialsCheck {
            username_invalid: self.username.chars().count() < 1,
            password_invalid: self.password.chars().count() < 4,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsCheck {
    pub username_invalid: bool,
    pub password_invalid: bool,
}

/// Arguments of the engine init call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    #[serde(flatten)]
    pub settings: SettingsSnapshot,
    pub exclude_users: Vec<String>,
    pub dry_run: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// Arguments of the engine follow-user-followers call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub usernames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_in_days: Option<OptionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_follows_per_user: Option<OptionValue>,
    pub skip_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_at_hour: Option<OptionValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "log" => Some(Self::Log),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            Self::Warn => Tone::Warning,
            Self::Error => Tone::Danger,
            Self::Log | Self::Info | Self::Debug => Tone::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tone {
    Default,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub parts: Vec<serde_json::Value>,
}

impl LogEntry {
    pub fn message(&self) -> String {
        self.parts
            .iter()
            .map(display_part)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Short local wall-clock time, `3:07 PM` or `15:07`.
    pub fn time_label(&self, clock: ClockFormat) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format(clock.pattern())
            .to_string()
    }
}

fn display_part(part: &serde_json::Value) -> String {
    match part {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub credentials: Credentials,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub title: String,
    pub text: String,
    pub confirm_label: String,
    pub cancel_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}
