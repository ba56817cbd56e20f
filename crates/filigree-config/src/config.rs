//! Project configuration: `.filigree/config.json`.
//!
//! The on-disk shape is a plain JSON object with a handful of required keys.
//! Unknown keys are ignored (serde's default when a struct has no
//! `deny_unknown_fields`), and an unrecognized `mode` string falls back to
//! `ethereal` rather than failing to load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file contained invalid JSON.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// No `.filigree/` directory was found walking up from the start path.
    #[error("no .filigree directory found (run init first)")]
    ProjectNotFound,

    /// A configuration value was invalid.
    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// The two supported execution modes.
///
/// Any other value encountered on disk falls back to [`Mode::Ethereal`]
/// rather than rejecting the whole config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Local, single-process, no background server.
    #[default]
    Ethereal,
    /// Runs behind a long-lived server process (e.g. serving the scan ingest API).
    Server,
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "server" => Mode::Server,
            _ => Mode::Ethereal,
        })
    }
}

fn default_version() -> i32 {
    1
}

fn default_enabled_packs() -> Vec<String> {
    vec!["core".to_string(), "planning".to_string(), "release".to_string()]
}

/// The full project configuration, corresponding to `.filigree/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Issue ID prefix (e.g. `"proj-"`).
    pub prefix: String,

    /// Config schema version, used to gate future migrations of this file.
    #[serde(default = "default_version")]
    pub version: i32,

    /// Which workflow packs are active. Disabling a pack does not remove
    /// existing issues of its types; they fall through to the permissive
    /// unknown-type path.
    #[serde(default = "default_enabled_packs")]
    pub enabled_packs: Vec<String>,

    /// Execution mode.
    #[serde(default)]
    pub mode: Mode,
}

impl ProjectConfig {
    /// Builds a default config for a freshly initialized project.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: default_version(),
            enabled_packs: default_enabled_packs(),
            mode: Mode::default(),
        }
    }
}

/// Load configuration from `config.json` inside the given `.filigree/` directory.
///
/// # Errors
///
/// Returns [`ConfigError::ProjectNotFound`] if the file does not exist,
/// [`ConfigError::Io`] on read failure, or [`ConfigError::Parse`] if the
/// file contains invalid JSON.
pub fn load_config(filigree_dir: &Path) -> Result<ProjectConfig> {
    let config_path = filigree_dir.join("config.json");
    if !config_path.exists() {
        return Err(ConfigError::ProjectNotFound);
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: ProjectConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to `config.json` inside the given `.filigree/` directory,
/// atomically: write to a temp file in the same directory, then rename.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] on I/O failure or [`ConfigError::Parse`] if
/// serialization fails.
pub fn save_config(filigree_dir: &Path, config: &ProjectConfig) -> Result<()> {
    std::fs::create_dir_all(filigree_dir)?;

    let config_path = filigree_dir.join("config.json");
    let tmp_path = filigree_dir.join(format!(".config.json.tmp-{}", std::process::id()));
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &config_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_has_default_packs_and_mode() {
        let cfg = ProjectConfig::new("proj-");
        assert_eq!(cfg.prefix, "proj-");
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.enabled_packs, vec!["core", "planning", "release"]);
        assert_eq!(cfg.mode, Mode::Ethereal);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path());
        assert!(matches!(result, Err(ConfigError::ProjectNotFound)));
    }

    #[test]
    fn roundtrip_is_atomic_and_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let filigree_dir = dir.path().join(".filigree");
        let cfg = ProjectConfig::new("demo-");

        save_config(&filigree_dir, &cfg).unwrap();
        let loaded = load_config(&filigree_dir).unwrap();

        assert_eq!(loaded.prefix, "demo-");
        assert_eq!(loaded.enabled_packs, cfg.enabled_packs);
        // No leftover temp file.
        let entries: Vec<_> = std::fs::read_dir(&filigree_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let filigree_dir = dir.path().join(".filigree");
        std::fs::create_dir_all(&filigree_dir).unwrap();
        std::fs::write(
            filigree_dir.join("config.json"),
            r#"{"prefix": "x-", "some_future_field": 42}"#,
        )
        .unwrap();

        let cfg = load_config(&filigree_dir).unwrap();
        assert_eq!(cfg.prefix, "x-");
        assert_eq!(cfg.version, 1);
    }

    #[test]
    fn unrecognized_mode_falls_back_to_ethereal() {
        let dir = tempfile::tempdir().unwrap();
        let filigree_dir = dir.path().join(".filigree");
        std::fs::create_dir_all(&filigree_dir).unwrap();
        std::fs::write(
            filigree_dir.join("config.json"),
            r#"{"prefix": "x-", "mode": "quantum"}"#,
        )
        .unwrap();

        let cfg = load_config(&filigree_dir).unwrap();
        assert_eq!(cfg.mode, Mode::Ethereal);
    }
}
