use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    device::ControllerOptions,
    reminders::{ConfirmPolicy, ReminderOptions},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionSettings {
    /// Re-arming a schedule cancels its previous alert and confirmation loop.
    pub replace_existing: bool,
    pub confirm_poll_interval_ms: u64,
    pub confirm_max_polls: Option<u32>,
    pub connect_timeout_secs: u64,
    pub adherence_tolerance_minutes: i64,
    pub write_clock_on_connect: bool,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            replace_existing: true,
            confirm_poll_interval_ms: 1_000,
            confirm_max_polls: None,
            connect_timeout_secs: 10,
            adherence_tolerance_minutes: 60,
            write_clock_on_connect: true,
        }
    }
}

impl CompanionSettings {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            write_clock_on_connect: self.write_clock_on_connect,
        }
    }

    pub fn confirm_policy(&self) -> ConfirmPolicy {
        ConfirmPolicy {
            poll_interval: Duration::from_millis(self.confirm_poll_interval_ms.max(1)),
            max_polls: self.confirm_max_polls,
        }
    }

    pub fn reminder_options(&self) -> ReminderOptions {
        ReminderOptions {
            replace_existing: self.replace_existing,
            policy: self.confirm_policy(),
        }
    }

    pub fn adherence_tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.adherence_tolerance_minutes.max(0))
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CompanionSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable as JSON.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring malformed settings at {}: {err}", path.display());
                CompanionSettings::default()
            })
        } else {
            CompanionSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> CompanionSettings {
        self.read().clone()
    }

    pub fn update<F>(&self, change: F) -> Result<CompanionSettings>
    where
        F: FnOnce(&mut CompanionSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, data: &CompanionSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, CompanionSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, CompanionSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.get(), CompanionSettings::default());
    }

    #[test]
    fn updates_persist_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update(|settings| {
                settings.replace_existing = false;
                settings.confirm_max_polls = Some(120);
            })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap().get();
        assert!(!reopened.replace_existing);
        assert_eq!(reopened.confirm_max_polls, Some(120));
        assert_eq!(reopened.connect_timeout_secs, 10);
    }

    #[test]
    fn partial_and_malformed_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{"connect_timeout_secs": 3}"#).unwrap();
        let partial = SettingsStore::new(path.clone()).unwrap().get();
        assert_eq!(partial.connect_timeout_secs, 3);
        assert!(partial.replace_existing);

        fs::write(&path, "not json").unwrap();
        assert_eq!(
            SettingsStore::new(path).unwrap().get(),
            CompanionSettings::default()
        );
    }

    #[test]
    fn derived_options_follow_settings() {
        let settings = CompanionSettings {
            confirm_poll_interval_ms: 250,
            connect_timeout_secs: 0,
            ..CompanionSettings::default()
        };
        assert_eq!(settings.confirm_policy().poll_interval, Duration::from_millis(250));
        assert_eq!(settings.controller_options().connect_timeout, Duration::from_secs(1));
        assert_eq!(settings.adherence_tolerance(), chrono::Duration::minutes(60));
    }
}
