use crate::models::{OptionValue, SettingKey, SettingsSnapshot, SKIP_PRIVATE_KEY, USERNAMES_KEY};
use crate::store::SettingsRepository;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

static TAG_SEPARATOR_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"[,\s]+").expect("valid tag separator regex"));

#[derive(Debug, Clone, Default)]
struct BridgeState {
    snapshot: SettingsSnapshot,
    skip_private: bool,
    usernames: Vec<String>,
}

/// Keeps the in-memory option set in sync with the persistent store.
///
/// Every change writes the affected key straight through; unchanged values are not
/// rewritten. Store failures are logged and otherwise ignored.
pub struct SettingsBridge {
    store: Arc<dyn SettingsRepository>,
    state: RwLock<BridgeState>,
}

impl SettingsBridge {
    pub fn load(store: Arc<dyn SettingsRepository>) -> Self {
        let mut state = BridgeState::default();

        for key in SettingKey::ALL {
            let value = read_key(store.as_ref(), key.as_str()).and_then(|raw| {
                let parsed = OptionValue::from_json(&raw);
                if parsed.is_none() && !raw.is_null() {
                    tracing::warn!(key = %key, "ignoring stored option with unexpected type");
                }
                parsed
            });
            state.snapshot.set(key, value);
        }

        state.skip_private = match read_key(store.as_ref(), SKIP_PRIVATE_KEY) {
            Some(serde_json::Value::Bool(value)) => value,
            Some(serde_json::Value::Null) | None => false,
            Some(_) => {
                tracing::warn!(key = SKIP_PRIVATE_KEY, "ignoring stored flag with unexpected type");
                false
            }
        };

        state.usernames = match read_key(store.as_ref(), USERNAMES_KEY) {
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(_) => {
                tracing::warn!(
                    key = USERNAMES_KEY,
                    "ignoring stored username list with unexpected type"
                );
                Vec::new()
            }
        };

        Self {
            store,
            state: RwLock::new(state),
        }
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        self.read().snapshot.clone()
    }

    pub fn skip_private(&self) -> bool {
        self.read().skip_private
    }

    pub fn usernames(&self) -> Vec<String> {
        self.read().usernames.clone()
    }

    /// Usernames with a leading `@` removed, ready to hand to the engine.
    pub fn normalized_usernames(&self) -> Vec<String> {
        normalize_usernames(&self.read().usernames)
    }

    pub fn usernames_valid(&self) -> bool {
        !self.read().usernames.is_empty()
    }

    /// Replaces the whole snapshot, writing every key whose value changed.
    ///
    /// Writes happen under the state lock so the store sees changes in the same order
    /// as memory does.
    pub fn replace_snapshot(&self, next: SettingsSnapshot) {
        let mut state = self.write();
        for key in SettingKey::ALL {
            if state.snapshot.get(key) != next.get(key) {
                self.persist(key.as_str(), next.get(key).map(OptionValue::to_json));
            }
        }
        state.snapshot = next;
    }

    pub fn set_option(&self, key: SettingKey, value: Option<OptionValue>) {
        let mut state = self.write();
        if state.snapshot.get(key) == value.as_ref() {
            return;
        }
        self.persist(key.as_str(), value.as_ref().map(OptionValue::to_json));
        state.snapshot.set(key, value);
    }

    pub fn set_skip_private(&self, skip_private: bool) {
        let mut state = self.write();
        if state.skip_private == skip_private {
            return;
        }
        self.persist(SKIP_PRIVATE_KEY, Some(serde_json::Value::Bool(skip_private)));
        state.skip_private = skip_private;
    }

    pub fn set_usernames(&self, usernames: Vec<String>) {
        let mut state = self.write();
        self.store_usernames(&mut state, usernames);
    }

    /// Appends the tags found in `raw` (split on commas and whitespace).
    pub fn add_usernames(&self, raw: &str) -> Vec<String> {
        let mut state = self.write();
        let mut usernames = state.usernames.clone();
        usernames.extend(parse_username_tags(raw));
        self.store_usernames(&mut state, usernames.clone());
        usernames
    }

    fn store_usernames(&self, state: &mut BridgeState, usernames: Vec<String>) {
        if state.usernames == usernames {
            return;
        }
        let value = serde_json::Value::Array(
            usernames.iter().cloned().map(serde_json::Value::String).collect(),
        );
        self.persist(USERNAMES_KEY, Some(value));
        state.usernames = usernames;
    }

    fn persist(&self, key: &str, value: Option<serde_json::Value>) {
        if let Err(error) = self.store.set(key, value) {
            tracing::warn!(key, error = %error, "failed to persist setting");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BridgeState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BridgeState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_key(store: &dyn SettingsRepository, key: &str) -> Option<serde_json::Value> {
    match store.get(key) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(key, error = %error, "failed to read setting");
            None
        }
    }
}

pub fn normalize_usernames(usernames: &[String]) -> Vec<String> {
    usernames
        .iter()
        .map(|user| user.strip_prefix('@').unwrap_or(user).to_string())
        .collect()
}

pub fn parse_username_tags(raw: &str) -> Vec<String> {
    TAG_SEPARATOR_RE
        .split(raw)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{normalize_usernames, parse_username_tags, SettingsBridge};
    use crate::errors::AppResult;
    use crate::models::{OptionValue, SettingKey, SettingsSnapshot};
    use crate::store::{MemorySettingsStore, SettingsRepository};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingStore {
        inner: MemorySettingsStore,
        writes: Mutex<Vec<String>>,
    }

    impl SettingsRepository for RecordingStore {
        fn get(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Option<serde_json::Value>) -> AppResult<()> {
            self.writes.lock().expect("writes").push(key.to_string());
            self.inner.set(key, value)
        }
    }

    #[test]
    fn load_reads_every_key_and_defaults_missing_ones() {
        let store = Arc::new(MemorySettingsStore::with_values([
            ("maxFollowsPerDay", json!(150)),
            ("runAtHour", json!(10)),
            ("followUserRatioMin", json!("oops")),
            ("usersToFollowFollowersOf", json!(["@alice", "bob"])),
        ]));
        let bridge = SettingsBridge::load(store);

        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.max_follows_per_day, Some(OptionValue::from(150)));
        assert_eq!(snapshot.run_at_hour, Some(OptionValue::from(10)));
        assert_eq!(snapshot.follow_user_ratio_min, None);
        assert_eq!(snapshot.max_follows_per_user, None);
        assert!(!bridge.skip_private());
        assert_eq!(bridge.usernames(), vec!["@alice", "bob"]);
        assert_eq!(bridge.normalized_usernames(), vec!["alice", "bob"]);
    }

    #[test]
    fn every_option_is_written_through() {
        let store = Arc::new(MemorySettingsStore::new());
        let bridge = SettingsBridge::load(store.clone());

        for (index, key) in SettingKey::ALL.into_iter().enumerate() {
            bridge.set_option(key, Some(OptionValue::from(index as i64 + 1)));
            assert_eq!(store.get(key.as_str()).expect("get"), Some(json!(index + 1)));
        }

        bridge.set_option(SettingKey::RunAtHour, None);
        assert_eq!(store.get("runAtHour").expect("get"), None);
    }

    #[test]
    fn replace_writes_only_changed_keys() {
        let store = Arc::new(RecordingStore::default());
        let bridge = SettingsBridge::load(store.clone());

        let mut first = SettingsSnapshot::default();
        first.set(SettingKey::MaxFollowsPerDay, Some(OptionValue::from(150)));
        first.set(SettingKey::RunAtHour, Some(OptionValue::from(10)));
        bridge.replace_snapshot(first.clone());

        let mut second = first.clone();
        second.set(SettingKey::RunAtHour, Some(OptionValue::from(11)));
        bridge.replace_snapshot(second);

        let writes = store.writes.lock().expect("writes").clone();
        assert_eq!(writes, vec!["maxFollowsPerDay", "runAtHour", "runAtHour"]);
        assert_eq!(store.get("runAtHour").expect("get"), Some(json!(11)));
    }

    #[derive(Default)]
    struct SlowStore {
        inner: MemorySettingsStore,
    }

    impl SettingsRepository for SlowStore {
        fn get(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Option<serde_json::Value>) -> AppResult<()> {
            std::thread::sleep(std::time::Duration::from_micros(200));
            self.inner.set(key, value)
        }
    }

    #[test]
    fn concurrent_writers_leave_store_and_memory_agreeing() {
        let store = Arc::new(SlowStore::default());
        let bridge = Arc::new(SettingsBridge::load(store.clone()));

        let replacer = std::thread::spawn({
            let bridge = bridge.clone();
            move || {
                for hour in 0..200 {
                    let mut next = SettingsSnapshot::default();
                    next.set(SettingKey::RunAtHour, Some(OptionValue::from(hour % 24)));
                    bridge.replace_snapshot(next);
                }
            }
        });
        let setter = std::thread::spawn({
            let bridge = bridge.clone();
            move || {
                for hour in 0..200 {
                    bridge.set_option(SettingKey::RunAtHour, Some(OptionValue::from(100 + hour)));
                }
            }
        });
        replacer.join().expect("replacer");
        setter.join().expect("setter");

        let in_memory = bridge.snapshot().run_at_hour.map(|value| value.to_json());
        assert_eq!(store.get("runAtHour").expect("get"), in_memory);
    }

    #[test]
    fn auxiliary_keys_are_written_through() {
        let store = Arc::new(RecordingStore::default());
        let bridge = SettingsBridge::load(store.clone());

        bridge.set_skip_private(true);
        bridge.set_skip_private(true);
        bridge.set_usernames(vec!["@alice".to_string()]);
        let all = bridge.add_usernames("bob, carol\tdave");

        assert_eq!(all, vec!["@alice", "bob", "carol", "dave"]);
        assert!(bridge.usernames_valid());
        assert_eq!(store.get("skipPrivate").expect("get"), Some(json!(true)));
        assert_eq!(
            store.get("usersToFollowFollowersOf").expect("get"),
            Some(json!(["@alice", "bob", "carol", "dave"]))
        );
        let writes = store.writes.lock().expect("writes").clone();
        assert_eq!(
            writes,
            vec!["skipPrivate", "usersToFollowFollowersOf", "usersToFollowFollowersOf"]
        );
    }

    #[test]
    fn normalization_strips_one_leading_at() {
        let input = vec!["@alice".to_string(), "bob".to_string(), "@@carol".to_string()];
        assert_eq!(normalize_usernames(&input), vec!["alice", "bob", "@carol"]);
    }

    #[test]
    fn tags_split_on_commas_and_whitespace() {
        assert_eq!(parse_username_tags(" alice,,bob \n carol "), vec!["alice", "bob", "carol"]);
        assert!(parse_username_tags(" , ").is_empty());
    }
}
