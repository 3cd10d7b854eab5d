//! Collaborators the optimizer talks to: where the project document lives
//! and where remembered per-clip options come from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::doc::project_from_json;
use crate::model::{ClipId, Project};
use crate::revision::{normalize_revision_chains, NormalizeReport};

/// Reads and durably stores the project document.
pub trait ProjectHost: Send + Sync {
    /// A working copy of the current project.
    fn project(&self) -> Result<Project>;

    /// Persist `project`. `reason` is a short label for logs and history.
    fn commit_project(&self, project: Project, reason: &str) -> Result<()>;
}

/// One optimize request's options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeOptions {
    #[serde(default)]
    pub requested_preset_id: Option<String>,
    /// Free text from the user. Only its length is recorded.
    #[serde(default)]
    pub user_prompt: Option<String>,
}

impl OptimizeOptions {
    pub fn preset(id: impl Into<String>) -> Self {
        Self {
            requested_preset_id: Some(id.into()),
            user_prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = Some(prompt.into());
        self
    }
}

/// Per-clip remembered optimize preferences. Read-only from here.
pub trait OptionsSource: Send + Sync {
    fn stored_options(&self, clip_id: &ClipId) -> Option<OptimizeOptions>;
}

/// Nothing is remembered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStoredOptions;

impl OptionsSource for NoStoredOptions {
    fn stored_options(&self, _clip_id: &ClipId) -> Option<OptimizeOptions> {
        None
    }
}

/// A fixed clip → options table.
#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
    by_clip: HashMap<ClipId, OptimizeOptions>,
}

impl StaticOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, clip_id: impl Into<ClipId>, options: OptimizeOptions) -> Self {
        self.by_clip.insert(clip_id.into(), options);
        self
    }

    /// Build from a clip id → preset id table, as found in config.
    pub fn from_presets(presets: &BTreeMap<String, String>) -> Self {
        let by_clip = presets
            .iter()
            .map(|(clip, preset)| (ClipId::new(clip.as_str()), OptimizeOptions::preset(preset.as_str())))
            .collect();
        Self { by_clip }
    }
}

impl OptionsSource for StaticOptions {
    fn stored_options(&self, clip_id: &ClipId) -> Option<OptimizeOptions> {
        self.by_clip.get(clip_id).cloned()
    }
}

// =============================================================================
// IN-MEMORY HOST
// =============================================================================

/// A commit as seen by [`InMemoryProjectHost`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub reason: String,
    pub project: Project,
}

/// Project held in memory. Keeps every commit for inspection.
#[derive(Debug, Default)]
pub struct InMemoryProjectHost {
    project: RwLock<Project>,
    commits: RwLock<Vec<CommitRecord>>,
    fail_commits: AtomicBool,
}

impl InMemoryProjectHost {
    pub fn new(project: Project) -> Self {
        Self {
            project: RwLock::new(project),
            commits: RwLock::new(Vec::new()),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// The last committed (or initial) project.
    pub fn current(&self) -> Project {
        self.project
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Make subsequent commits fail, as a broken transport would.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl ProjectHost for InMemoryProjectHost {
    fn project(&self) -> Result<Project> {
        Ok(self.current())
    }

    fn commit_project(&self, project: Project, reason: &str) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            anyhow::bail!("commit rejected by host: {reason}");
        }
        self.commits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommitRecord {
                reason: reason.to_string(),
                project: project.clone(),
            });
        *self.project.write().unwrap_or_else(PoisonError::into_inner) = project;
        Ok(())
    }
}

// =============================================================================
// FILE HOST
// =============================================================================

/// Project stored as a pretty-printed JSON file.
///
/// Loading accepts legacy shapes and normalizes them. A missing file reads
/// as an empty project.
#[derive(Debug, Clone)]
pub struct FileProjectHost {
    path: PathBuf,
}

impl FileProjectHost {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and normalize, reporting what had to be repaired.
    pub fn load(&self) -> Result<(Project, NormalizeReport)> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "project file missing, starting empty");
            return Ok((Project::default(), NormalizeReport::default()));
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read project file: {}", self.path.display()))?;
        let (project, report) = project_from_json(&json)
            .with_context(|| format!("Failed to parse project file: {}", self.path.display()))?;

        if !report.is_clean() {
            warn!(path = %self.path.display(), ?report, "normalized project on load");
        }
        Ok((project, report))
    }

    /// Write `project` atomically: temp file, then rename over the target.
    pub fn save(&self, project: &Project) -> Result<()> {
        let json = serde_json::to_string_pretty(project).context("Failed to serialize project")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create project directory: {}", parent.display())
                })?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ProjectHost for FileProjectHost {
    fn project(&self) -> Result<Project> {
        Ok(self.load()?.0)
    }

    fn commit_project(&self, mut project: Project, reason: &str) -> Result<()> {
        let report = normalize_revision_chains(&mut project);
        if !report.is_clean() {
            warn!(?report, reason, "normalized project before write");
        }
        self.save(&project)?;
        info!(path = %self.path.display(), reason, "committed project");
        Ok(())
    }
}
