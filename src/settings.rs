//! User settings and UI preference storage.
//!
//! Simple key-value state the core depends on: per-user theme and
//! chat-history toggle, plus the global theme preference the web UI reads
//! before it knows which user it is.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub theme: String,
    #[serde(rename = "chatHistoryEnabled")]
    pub chat_history_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: "system".to_owned(),
            chat_history_enabled: true,
        }
    }
}

/// Partial settings update from the PATCH endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub theme: Option<String>,
    #[serde(rename = "chatHistoryEnabled")]
    pub chat_history_enabled: Option<bool>,
}

/// Process-wide settings store.
#[derive(Default)]
pub struct SettingsStore {
    users: Mutex<HashMap<String, UserSettings>>,
    global_theme: Mutex<Option<String>>,
}

impl SettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a user (defaults when never written).
    #[must_use]
    pub fn get(&self, user_id: &str) -> UserSettings {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Apply a partial update; returns the resulting settings.
    pub fn update(&self, user_id: &str, patch: &SettingsPatch) -> UserSettings {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let settings = users.entry(user_id.to_owned()).or_default();
        if let Some(theme) = &patch.theme {
            settings.theme = theme.clone();
        }
        if let Some(enabled) = patch.chat_history_enabled {
            settings.chat_history_enabled = enabled;
        }
        settings.clone()
    }

    /// Global UI theme preference.
    #[must_use]
    pub fn global_theme(&self) -> String {
        self.global_theme
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "system".to_owned())
    }

    /// Set the global UI theme preference.
    pub fn set_global_theme(&self, theme: &str) {
        let mut guard = self.global_theme.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(theme.to_owned());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn unknown_user_gets_defaults() {
        let store = SettingsStore::new();
        let settings = store.get("u1");
        assert_eq!(settings.theme, "system");
        assert!(settings.chat_history_enabled);
    }

    #[test]
    fn patch_updates_only_named_fields() {
        let store = SettingsStore::new();
        let updated = store.update(
            "u1",
            &SettingsPatch {
                theme: Some("dark".to_owned()),
                chat_history_enabled: None,
            },
        );
        assert_eq!(updated.theme, "dark");
        assert!(updated.chat_history_enabled);

        let updated = store.update(
            "u1",
            &SettingsPatch {
                theme: None,
                chat_history_enabled: Some(false),
            },
        );
        assert_eq!(updated.theme, "dark");
        assert!(!updated.chat_history_enabled);
    }

    #[test]
    fn global_theme_round_trips() {
        let store = SettingsStore::new();
        assert_eq!(store.global_theme(), "system");
        store.set_global_theme("light");
        assert_eq!(store.global_theme(), "light");
    }
}
