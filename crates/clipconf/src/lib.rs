//! Minimal configuration loading for cliprev.
//!
//! This crate is imported by both the core library and the CLI, so it keeps
//! its dependencies to serde, toml and directories.
//!
//! # Usage
//!
//! ```rust,no_run
//! use clipconf::ClipConfig;
//!
//! let config = ClipConfig::load().expect("Failed to load config");
//!
//! println!("Project: {}", config.paths.project_file().display());
//! println!("Default preset: {}", config.optimizer.default_preset);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cliprev/config.toml` (system)
//! 2. `~/.config/cliprev/config.toml` (user)
//! 3. `./cliprev.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`CLIPREV_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/cliprev"
//! project_file = "~/songs/demo.json"
//!
//! [logging]
//! log_level = "info,cliprev=debug"
//!
//! [optimizer]
//! default_preset = "noop"
//! max_examples = 3
//!
//! [optimizer.clip_presets]
//! intro = "dynamics_accent"
//!
//! [revisions]
//! max_snapshots = 0
//!
//! [timebase]
//! default_bpm = 120.0
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{LoggingConfig, OptimizerConfig, PathsConfig, RevisionsConfig, TimebaseConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete cliprev configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClipConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub revisions: RevisionsConfig,

    #[serde(default)]
    pub timebase: TimebaseConfig,
}

impl ClipConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./cliprev.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            merged = loader::merge_tables(merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::into_config(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# cliprev configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.paths.state_dir.display()
        ));
        output.push_str(&format!(
            "project_file = \"{}\"\n",
            self.paths.project_file().display()
        ));

        output.push_str("\n[logging]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.logging.log_level));

        output.push_str("\n[optimizer]\n");
        output.push_str(&format!(
            "default_preset = \"{}\"\n",
            self.optimizer.default_preset
        ));
        output.push_str(&format!("max_examples = {}\n", self.optimizer.max_examples));

        output.push_str("\n[optimizer.clip_presets]\n");
        for (clip, preset) in &self.optimizer.clip_presets {
            output.push_str(&format!("\"{}\" = \"{}\"\n", clip, preset));
        }

        output.push_str("\n[revisions]\n");
        output.push_str(&format!("max_snapshots = {}\n", self.revisions.max_snapshots));

        output.push_str("\n[timebase]\n");
        output.push_str(&format!("default_bpm = {:?}\n", self.timebase.default_bpm));
        output.push_str(&format!("min_bpm = {:?}\n", self.timebase.min_bpm));
        output.push_str(&format!("max_bpm = {:?}\n", self.timebase.max_bpm));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClipConfig::default();
        assert_eq!(config.optimizer.default_preset, "noop");
        assert_eq!(config.optimizer.max_examples, 3);
        assert_eq!(config.revisions.snapshot_cap(), None);
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = ClipConfig::default();
        config
            .optimizer
            .clip_presets
            .insert("intro".to_string(), "dynamics_accent".to_string());
        let rendered = config.to_toml();
        assert!(rendered.contains("[optimizer.clip_presets]"));

        let reparsed: ClipConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.optimizer, config.optimizer);
        assert_eq!(reparsed.timebase, config.timebase);
        assert_eq!(reparsed.paths.project_file(), config.paths.project_file());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cliprev.toml");
        std::fs::write(
            &path,
            "[optimizer]\ndefault_preset = \"dynamics_level\"\n",
        )
        .unwrap();

        let (config, sources) = ClipConfig::load_with_sources_from(Some(&path)).unwrap();
        assert!(sources.files.contains(&path));
        // Env may override in CI, but the file value wins over the default.
        if !sources
            .env_overrides
            .iter()
            .any(|k| k == "CLIPREV_DEFAULT_PRESET")
        {
            assert_eq!(config.optimizer.default_preset, "dynamics_level");
        }
    }
}
