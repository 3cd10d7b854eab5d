//! Config file discovery, loading, and environment variable overlay.

use crate::{ClipConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cliprev/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cliprev/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cliprev.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
///
/// Files are kept as tables until every layer is merged, so a later file
/// only overrides the keys it actually sets.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a single config file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<ClipConfig, ConfigError> {
    let table = load_table(path)?;
    into_config(table, path)
}

/// Deserialize a merged table into a config, filling gaps with defaults.
pub fn into_config(table: toml::Table, origin: &Path) -> Result<ClipConfig, ConfigError> {
    let mut config: ClipConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.paths.state_dir = expand_path(&config.paths.state_dir.to_string_lossy());
    if let Some(project_file) = config.paths.project_file.take() {
        config.paths.project_file = Some(expand_path(&project_file.to_string_lossy()));
    }

    Ok(config)
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key;
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                base.insert(key, toml::Value::Table(merge_tables(existing, incoming)));
            }
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
    base
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ClipConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("CLIPREV_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("CLIPREV_STATE_DIR".to_string());
    }
    if let Ok(v) = env::var("CLIPREV_PROJECT_FILE") {
        config.paths.project_file = Some(expand_path(&v));
        sources.env_overrides.push("CLIPREV_PROJECT_FILE".to_string());
    }

    if let Ok(v) = env::var("CLIPREV_LOG_LEVEL") {
        config.logging.log_level = v;
        sources.env_overrides.push("CLIPREV_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.logging.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("CLIPREV_DEFAULT_PRESET") {
        config.optimizer.default_preset = v;
        sources.env_overrides.push("CLIPREV_DEFAULT_PRESET".to_string());
    }
    if let Ok(v) = env::var("CLIPREV_MAX_SNAPSHOTS") {
        if let Ok(cap) = v.parse() {
            config.revisions.max_snapshots = cap;
            sources.env_overrides.push("CLIPREV_MAX_SNAPSHOTS".to_string());
        }
    }
    if let Ok(v) = env::var("CLIPREV_DEFAULT_BPM") {
        if let Ok(bpm) = v.parse() {
            config.timebase.default_bpm = bpm;
            sources.env_overrides.push("CLIPREV_DEFAULT_BPM".to_string());
        }
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
