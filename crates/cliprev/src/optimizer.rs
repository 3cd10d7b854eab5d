//! Optimize and undo-optimize.
//!
//! The optimizer is the only thing that ties patches to revisions. An
//! optimize pass works on a copy of the project and does nothing visible
//! until the very end:
//!
//! 1. resolve options (override, then stored per-clip, then last used)
//! 2. build a patch (corrective pass, else a preset)
//! 3. empty patch: report `ops = 0` and stop, nothing written
//! 4. validate, then apply to a scratch clip
//! 5. begin one revision, commit the patched score into it, record audit
//! 6. commit the project through the host, once
//!
//! Any failure before step 6 leaves the host's project as it was.
//!
//! Calls for the same clip are serialized. The final commit re-reads the
//! project and replaces only the touched clip, so passes on different clips
//! do not overwrite each other.

use chrono::Utc;
use clipconf::{OptimizerConfig, RevisionsConfig};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ApplyError, FailureReason, PatchRejection, RevisionError};
use crate::host::{NoStoredOptions, OptimizeOptions, OptionsSource, ProjectHost};
use crate::model::{Clip, ClipId, OptimizerAudit, RevisionId};
use crate::patch::{apply_patch, build_patch, PatchSummary, PatchValidator, StrictValidator};
use crate::revision::{begin_revision, rollback_revision, RevisionOptions};

/// Commit reasons passed to [`ProjectHost::commit_project`].
pub const OPTIMIZE_COMMIT_REASON: &str = "optimize";
pub const UNDO_COMMIT_REASON: &str = "undo_optimize";

/// Why an optimize or undo did not go through.
#[derive(Debug, Error)]
pub enum OptimizeFailure {
    #[error("clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("patch rejected ({code}): {0}", code = .0.code())]
    PatchRejected(PatchRejection),

    #[error("patch could not be applied: {0}")]
    ApplyFailed(ApplyError),

    #[error("could not begin revision: {0}")]
    BeginRevisionFailed(RevisionError),

    #[error("clip {0} has no parent revision to roll back to")]
    NoRollback(ClipId),

    #[error(transparent)]
    Revision(RevisionError),

    #[error("project unavailable: {0:#}")]
    ProjectUnavailable(anyhow::Error),

    #[error("commit failed: {0:#}")]
    CommitFailed(anyhow::Error),
}

impl OptimizeFailure {
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeFailure::ClipNotFound(_) => "clip_not_found",
            OptimizeFailure::PatchRejected(_) => "patch_rejected",
            OptimizeFailure::ApplyFailed(_) => "apply_failed",
            OptimizeFailure::BeginRevisionFailed(_) => "begin_revision_failed",
            OptimizeFailure::NoRollback(_) => "no_rollback",
            OptimizeFailure::Revision(err) => err.code(),
            OptimizeFailure::ProjectUnavailable(_) => "project_unavailable",
            OptimizeFailure::CommitFailed(_) => "commit_failed",
        }
    }

    pub fn reason(&self) -> FailureReason {
        FailureReason::new(self.code(), self.to_string())
    }
}

impl From<RevisionError> for OptimizeFailure {
    fn from(err: RevisionError) -> Self {
        match err {
            RevisionError::ClipNotFound(id) => OptimizeFailure::ClipNotFound(id),
            RevisionError::NoRollback(id) => OptimizeFailure::NoRollback(id),
            other => OptimizeFailure::Revision(other),
        }
    }
}

/// Result of [`Optimizer::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub ok: bool,
    pub ops: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<RevisionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_summary: Option<PatchSummary>,
}

impl OptimizeReport {
    fn failed(failure: &OptimizeFailure, patch_summary: Option<PatchSummary>) -> Self {
        let reason = failure.reason();
        Self {
            ok: false,
            ops: 0,
            revision_id: None,
            patch_summary: patch_summary.map(|s| s.failed(reason.clone())),
            reason: Some(reason),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.reason.as_ref().map(|r| r.code.as_str())
    }
}

/// Result of [`Optimizer::undo_optimize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<RevisionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl UndoReport {
    fn failed(failure: &OptimizeFailure) -> Self {
        Self {
            ok: false,
            changed: Some(false),
            revision_id: None,
            reason: Some(failure.reason()),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.reason.as_ref().map(|r| r.code.as_str())
    }
}

/// One mutex per clip id, created on first use.
#[derive(Debug, Default)]
struct ClipLocks {
    locks: DashMap<ClipId, Arc<Mutex<()>>>,
}

impl ClipLocks {
    fn lock_for(&self, clip_id: &ClipId) -> Arc<Mutex<()>> {
        self.locks.entry(clip_id.clone()).or_default().clone()
    }
}

pub struct Optimizer {
    host: Arc<dyn ProjectHost>,
    validator: Arc<dyn PatchValidator>,
    options_source: Arc<dyn OptionsSource>,
    default_preset: String,
    max_examples: usize,
    max_snapshots: Option<usize>,
    last_used: Mutex<Option<OptimizeOptions>>,
    clip_locks: ClipLocks,
    commit_lock: Mutex<()>,
}

impl Optimizer {
    /// Strict validation, no stored options, settings from
    /// [`OptimizerConfig::default`].
    pub fn new(host: Arc<dyn ProjectHost>) -> Self {
        let config = OptimizerConfig::default();
        Self {
            host,
            validator: Arc::new(StrictValidator),
            options_source: Arc::new(NoStoredOptions),
            default_preset: config.default_preset,
            max_examples: config.max_examples,
            max_snapshots: None,
            last_used: Mutex::new(None),
            clip_locks: ClipLocks::default(),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn PatchValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_options_source(mut self, source: Arc<dyn OptionsSource>) -> Self {
        self.options_source = source;
        self
    }

    pub fn with_config(mut self, optimizer: &OptimizerConfig, revisions: &RevisionsConfig) -> Self {
        self.default_preset = optimizer.default_preset.clone();
        self.max_examples = optimizer.max_examples;
        self.max_snapshots = revisions.snapshot_cap();
        self
    }

    /// The options the last explicit request carried.
    pub fn last_used(&self) -> Option<OptimizeOptions> {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one optimize pass on `clip_id`. Never fails outright; failures
    /// come back in the report.
    pub fn optimize(&self, clip_id: &ClipId, options: Option<OptimizeOptions>) -> OptimizeReport {
        let lock = self.clip_locks.lock_for(clip_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut summary = None;
        match self.run_optimize(clip_id, options, &mut summary) {
            Ok(report) => report,
            Err(failure) => {
                warn!(clip_id = %clip_id, code = failure.code(), error = %failure, "optimize failed");
                OptimizeReport::failed(&failure, summary)
            }
        }
    }

    fn run_optimize(
        &self,
        clip_id: &ClipId,
        options: Option<OptimizeOptions>,
        summary_out: &mut Option<PatchSummary>,
    ) -> Result<OptimizeReport, OptimizeFailure> {
        let options = self.resolve_options(clip_id, options);
        let requested = options.requested_preset_id.as_deref();
        let prompt_len = options.user_prompt.as_ref().map(|p| p.chars().count());

        let mut project = self.host.project().map_err(OptimizeFailure::ProjectUnavailable)?;
        let clip = project
            .clip(clip_id)
            .ok_or_else(|| OptimizeFailure::ClipNotFound(clip_id.clone()))?;
        let source_revision = clip.revision_id.clone();

        let plan = build_patch(clip, requested, &self.default_preset);
        let summary = plan.summary(self.max_examples);
        *summary_out = Some(summary.clone());

        if plan.patch.is_empty() {
            debug!(
                clip_id = %clip_id,
                preset = %plan.executed_preset_id,
                "empty patch, leaving revisions untouched"
            );
            return Ok(OptimizeReport {
                ok: true,
                ops: 0,
                revision_id: Some(source_revision),
                reason: None,
                patch_summary: Some(summary),
            });
        }

        self.validator
            .validate(&plan.patch, clip)
            .map_err(OptimizeFailure::PatchRejected)?;
        let patched = apply_patch(clip, &plan.patch).map_err(OptimizeFailure::ApplyFailed)?;

        let opts = RevisionOptions::named(format!("optimize:{}", plan.executed_preset_id))
            .with_max_snapshots(self.max_snapshots);
        let revision_id = begin_revision(&mut project, clip_id, &opts)
            .map_err(OptimizeFailure::BeginRevisionFailed)?;

        let ops = plan.patch.len();
        let clip = project
            .clip_mut(clip_id)
            .ok_or_else(|| OptimizeFailure::ClipNotFound(clip_id.clone()))?;
        clip.commit_head(patched.score);
        clip.meta.optimizer = Some(OptimizerAudit {
            source_revision_id: source_revision.clone(),
            optimized_at: Utc::now(),
            patch_ops: ops,
            prompt_len,
            patch_summary: summary.clone(),
        });
        clip.sync_head_snapshot();

        let clip = clip.clone();
        self.commit_clip(clip, OPTIMIZE_COMMIT_REASON)?;

        info!(
            clip_id = %clip_id,
            revision_id = %revision_id,
            parent = %source_revision,
            ops,
            preset = %plan.executed_preset_id,
            "optimized clip"
        );
        Ok(OptimizeReport {
            ok: true,
            ops,
            revision_id: Some(revision_id),
            reason: None,
            patch_summary: Some(summary),
        })
    }

    /// Explicit override, else the clip's stored preference, else the last
    /// explicit override. An explicit override becomes the new last used.
    fn resolve_options(&self, clip_id: &ClipId, explicit: Option<OptimizeOptions>) -> OptimizeOptions {
        let mut last_used = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(options) = explicit {
            *last_used = Some(options.clone());
            return options;
        }
        self.options_source
            .stored_options(clip_id)
            .or_else(|| last_used.clone())
            .unwrap_or_default()
    }

    /// Roll the clip back to its parent revision. Writes only if the head
    /// actually moved.
    pub fn undo_optimize(&self, clip_id: &ClipId) -> UndoReport {
        let lock = self.clip_locks.lock_for(clip_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.run_undo(clip_id) {
            Ok(revision_id) => UndoReport {
                ok: true,
                changed: Some(true),
                revision_id: Some(revision_id),
                reason: None,
            },
            Err(failure) => {
                match failure {
                    OptimizeFailure::NoRollback(_) => {
                        debug!(clip_id = %clip_id, "nothing to undo")
                    }
                    _ => warn!(clip_id = %clip_id, code = failure.code(), error = %failure, "undo failed"),
                }
                UndoReport::failed(&failure)
            }
        }
    }

    fn run_undo(&self, clip_id: &ClipId) -> Result<RevisionId, OptimizeFailure> {
        let mut project = self.host.project().map_err(OptimizeFailure::ProjectUnavailable)?;
        let from = project
            .clip(clip_id)
            .map(|c| c.revision_id.clone())
            .ok_or_else(|| OptimizeFailure::ClipNotFound(clip_id.clone()))?;

        let revision_id = rollback_revision(&mut project, clip_id)?;
        let clip = project
            .clip(clip_id)
            .cloned()
            .ok_or_else(|| OptimizeFailure::ClipNotFound(clip_id.clone()))?;
        self.commit_clip(clip, UNDO_COMMIT_REASON)?;

        info!(clip_id = %clip_id, from = %from, to = %revision_id, "undid optimize");
        Ok(revision_id)
    }

    /// Write one clip into the host's current project and commit it.
    fn commit_clip(&self, clip: Clip, reason: &str) -> Result<(), OptimizeFailure> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut project = self.host.project().map_err(OptimizeFailure::ProjectUnavailable)?;
        if !project.clip_order.contains(&clip.id) {
            project.clip_order.push(clip.id.clone());
        }
        project.clips.insert(clip.id.clone(), clip);
        self.host
            .commit_project(project, reason)
            .map_err(OptimizeFailure::CommitFailed)
    }
}
