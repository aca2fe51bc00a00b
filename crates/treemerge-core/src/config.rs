use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use treemerge_engine::{MergeConfig, MergeEngine};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Log file name; rotated files get a date suffix.
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_level(),
            file: default_log_file(),
            rotation: LogRotation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Scenarios merged at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: false,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".treemerge").join("logs")
}
fn default_log_file() -> String {
    "treemerge.log".into()
}
fn default_level() -> String {
    "info".into()
}
fn default_concurrency() -> usize {
    4
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Builds an engine from the `merge` section, rejecting bad matcher or
    /// cost-model parameters.
    pub fn engine(&self) -> anyhow::Result<MergeEngine> {
        MergeEngine::new(self.merge.clone()).context("invalid merge settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.merge.conditional_merge = true;
        settings.batch.concurrency = 8;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.merge.conditional_merge);
        assert_eq!(loaded.batch.concurrency, 8);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"batch": {"fail_fast": true}}"#).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.batch.fail_fast);
        assert_eq!(loaded.batch.concurrency, 4);
        assert!(!loaded.merge.conditional_merge);
        assert_eq!(loaded.logging.dir, PathBuf::from(".treemerge/logs"));
    }

    #[test]
    fn test_log_rotation_from_settings() {
        let settings: Settings =
            serde_json::from_str(r#"{"logging": {"rotation": "daily", "file": "run.log"}}"#).unwrap();
        assert_eq!(settings.logging.rotation, LogRotation::Daily);
        assert_eq!(settings.logging.file, "run.log");
        assert_eq!(settings.logging.level, "info");
        assert_eq!(LoggingSettings::default().rotation, LogRotation::Never);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.batch.concurrency, 4);
    }

    #[test]
    fn test_engine_rejects_unknown_strategy() {
        let mut settings = Settings::default();
        settings.merge.matcher.ordered_strategy = "bogus".into();
        let err = settings.engine().err().unwrap();
        assert!(err.to_string().contains("invalid merge settings"));
    }
}
