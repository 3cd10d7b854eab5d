//! Config sections. Every field has a compiled default so a missing file,
//! or a file that only sets one key, still yields a complete config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where project state lives on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state.
    /// Default: ~/.local/share/cliprev
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Project document read and committed by the CLI.
    /// Default: `<state_dir>/project.json`
    #[serde(default)]
    pub project_file: Option<PathBuf>,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/cliprev"))
            .unwrap_or_else(|| PathBuf::from(".local/share/cliprev"))
    }

    /// The project file, falling back to `project.json` under the state dir.
    pub fn project_file(&self) -> PathBuf {
        self.project_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("project.json"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            project_file: None,
        }
    }
}

/// Log filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive (trace, debug, info, warn, error, or a full
    /// `target=level` list).
    /// Default: info
    #[serde(default = "LoggingConfig::default_log_level")]
    pub log_level: String,
}

impl LoggingConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Optimizer defaults and remembered per-clip preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Preset used when neither the call, the clip, nor the last run names one.
    /// Default: noop
    #[serde(default = "OptimizerConfig::default_preset")]
    pub default_preset: String,

    /// Before/after examples kept in each patch summary.
    /// Default: 3
    #[serde(default = "OptimizerConfig::default_max_examples")]
    pub max_examples: usize,

    /// Remembered preset per clip id.
    #[serde(default)]
    pub clip_presets: BTreeMap<String, String>,
}

impl OptimizerConfig {
    fn default_preset() -> String {
        "noop".to_string()
    }

    fn default_max_examples() -> usize {
        3
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_preset: Self::default_preset(),
            max_examples: Self::default_max_examples(),
            clip_presets: BTreeMap::new(),
        }
    }
}

/// Revision history retention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionsConfig {
    /// Maximum snapshots kept per clip. 0 keeps everything.
    #[serde(default)]
    pub max_snapshots: usize,
}

impl RevisionsConfig {
    /// The cap, or `None` when history is unbounded.
    pub fn snapshot_cap(&self) -> Option<usize> {
        (self.max_snapshots > 0).then_some(self.max_snapshots)
    }
}

/// Tempo handling for beat/second conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimebaseConfig {
    /// Tempo used when a project carries none (or an unusable one).
    /// Default: 120
    #[serde(default = "TimebaseConfig::default_bpm")]
    pub default_bpm: f64,

    /// Default: 30
    #[serde(default = "TimebaseConfig::default_min_bpm")]
    pub min_bpm: f64,

    /// Default: 260
    #[serde(default = "TimebaseConfig::default_max_bpm")]
    pub max_bpm: f64,
}

impl TimebaseConfig {
    fn default_bpm() -> f64 {
        120.0
    }

    fn default_min_bpm() -> f64 {
        30.0
    }

    fn default_max_bpm() -> f64 {
        260.0
    }
}

impl Default for TimebaseConfig {
    fn default() -> Self {
        Self {
            default_bpm: Self::default_bpm(),
            min_bpm: Self::default_min_bpm(),
            max_bpm: Self::default_max_bpm(),
        }
    }
}
