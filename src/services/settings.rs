//! Persistent client settings.
//!
//! A small JSON file read once at startup and written only on explicit
//! save. A missing or corrupt file yields defaults; out-of-range values
//! are clamped on load rather than rejected.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Lowest selectable confidence threshold.
pub const MIN_THRESHOLD: f64 = 50.0;
/// Highest selectable confidence threshold.
pub const MAX_THRESHOLD: f64 = 95.0;
/// Threshold used when no saved value exists.
pub const DEFAULT_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Minimum confidence for signal delivery, clamped to [50, 95].
    pub min_confidence_threshold: f64,
    pub notification_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_confidence_threshold: DEFAULT_THRESHOLD,
            notification_enabled: true,
        }
    }
}

impl Settings {
    /// Clamp values into their allowed ranges.
    pub fn clamped(mut self) -> Self {
        self.min_confidence_threshold = self
            .min_confidence_threshold
            .clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        if !self.min_confidence_threshold.is_finite() {
            self.min_confidence_threshold = DEFAULT_THRESHOLD;
        }
        self
    }
}

/// File-backed settings store.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from the given path, falling back to defaults when
    /// the file is missing or unreadable.
    pub fn load(path: PathBuf) -> Arc<Self> {
        let settings = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
                Ok(parsed) => parsed.clamped(),
                Err(e) => {
                    warn!("Settings file {} is corrupt ({}), using defaults", path.display(), e);
                    Settings::default()
                }
            },
            Err(_) => {
                debug!("No settings file at {}, using defaults", path.display());
                Settings::default()
            }
        };

        Arc::new(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    pub fn get(&self) -> Settings {
        self.current.read().unwrap().clone()
    }

    /// Persist new settings. Values are clamped before being stored and
    /// written; the file is only touched here, never on reads.
    pub fn save(&self, settings: Settings) -> Result<Settings> {
        let settings = settings.clamped();
        let raw = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, raw).map_err(|e| {
            crate::error::AppError::Internal(format!(
                "failed to write settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        *self.current.write().unwrap() = settings.clone();
        debug!(
            "Settings saved (threshold {:.1}, notifications {})",
            settings.min_confidence_threshold, settings.notification_enabled
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("augury-settings-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.min_confidence_threshold, 75.0);
        assert!(settings.notification_enabled);
    }

    #[test]
    fn test_clamp_range() {
        let low = Settings {
            min_confidence_threshold: 10.0,
            notification_enabled: true,
        };
        assert_eq!(low.clamped().min_confidence_threshold, 50.0);

        let high = Settings {
            min_confidence_threshold: 99.0,
            notification_enabled: true,
        };
        assert_eq!(high.clamped().min_confidence_threshold, 95.0);

        let in_range = Settings {
            min_confidence_threshold: 80.0,
            notification_enabled: false,
        };
        assert_eq!(in_range.clamped().min_confidence_threshold, 80.0);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let store = SettingsStore::load(temp_path("missing"));
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json at all").unwrap();

        let store = SettingsStore::load(path.clone());
        assert_eq!(store.get(), Settings::default());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_save_then_reload_roundtrip() {
        let path = temp_path("roundtrip");

        let store = SettingsStore::load(path.clone());
        let saved = store
            .save(Settings {
                min_confidence_threshold: 85.0,
                notification_enabled: false,
            })
            .unwrap();
        assert_eq!(saved.min_confidence_threshold, 85.0);

        let reloaded = SettingsStore::load(path.clone());
        assert_eq!(reloaded.get(), saved);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_save_clamps_before_writing() {
        let path = temp_path("clamp");

        let store = SettingsStore::load(path.clone());
        let saved = store
            .save(Settings {
                min_confidence_threshold: 120.0,
                notification_enabled: true,
            })
            .unwrap();
        assert_eq!(saved.min_confidence_threshold, 95.0);
        assert_eq!(store.get().min_confidence_threshold, 95.0);

        std::fs::remove_file(path).ok();
    }
}
