//! Persistence for the one user choice this controller owns: the selected idle screen.

use crate::lock_or_recover;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SettingsStore: Send + Sync {
    fn load_selected(&self) -> Result<Option<String>>;
    fn save_selected(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<String>,
    /// Keys written by other tools are carried through untouched.
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// JSON settings file.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SettingsFile> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(SettingsFile::default()),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parse settings {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(err) => {
                Err(err).with_context(|| format!("read settings {}", self.path.display()))
            }
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn load_selected(&self) -> Result<Option<String>> {
        Ok(self.read()?.selected)
    }

    fn save_selected(&self, name: &str) -> Result<()> {
        let mut file = self.read().unwrap_or_default();
        file.selected = Some(name.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&file).context("encode settings")?;
        fs::write(&self.path, text)
            .with_context(|| format!("write settings {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory settings, for tests and `--settings-path`-less dry runs.
#[derive(Debug, Default)]
pub struct MemorySettings {
    selected: Mutex<Option<String>>,
}

impl MemorySettings {
    pub fn new(selected: Option<&str>) -> Self {
        Self {
            selected: Mutex::new(selected.map(str::to_string)),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load_selected(&self) -> Result<Option<String>> {
        Ok(lock_or_recover(&self.selected, "MemorySettings::load").clone())
    }

    fn save_selected(&self, name: &str) -> Result<()> {
        *lock_or_recover(&self.selected, "MemorySettings::save") = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_settings_path() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("faceplate_settings_{nanos}/settings.json"))
    }

    #[test]
    fn missing_file_has_no_selection() {
        let settings = JsonFileSettings::new(temp_settings_path());
        assert_eq!(settings.load_selected().unwrap(), None);
    }

    #[test]
    fn selection_round_trips_and_keeps_foreign_keys() {
        let path = temp_settings_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"use_listening_beep": true}"#).unwrap();

        let settings = JsonFileSettings::new(&path);
        settings.save_selected("Weather").unwrap();
        assert_eq!(settings.load_selected().unwrap().as_deref(), Some("Weather"));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["use_listening_beep"], true);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_is_an_error_on_load() {
        let path = temp_settings_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileSettings::new(&path).load_selected().is_err());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn memory_settings_store_selection() {
        let settings = MemorySettings::new(Some("Time and Date"));
        assert_eq!(settings.load_selected().unwrap().as_deref(), Some("Time and Date"));
        settings.save_selected("Weather").unwrap();
        assert_eq!(settings.load_selected().unwrap().as_deref(), Some("Weather"));
    }
}
