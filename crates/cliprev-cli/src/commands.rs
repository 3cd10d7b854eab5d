//! Subcommand implementations. Each returns the JSON printed on stdout.

use anyhow::Result;
use clipconf::ClipConfig;
use cliprev::timebase::resolve_bpm;
use cliprev::{
    begin_revision, list_revisions, score_beat_to_sec, switch_active_revision,
    verify_revision_integrity, ClipId, FailureReason, FileProjectHost, OptimizeOptions, Optimizer,
    ProjectHost, RevisionError, RevisionId, RevisionOptions, StaticOptions,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct Ctx {
    pub config: ClipConfig,
    host: Arc<FileProjectHost>,
}

impl Ctx {
    pub fn new(config: ClipConfig, project_override: Option<PathBuf>) -> Self {
        let path = project_override.unwrap_or_else(|| config.paths.project_file());
        Self {
            host: Arc::new(FileProjectHost::new(path)),
            config,
        }
    }

    fn optimizer(&self) -> Optimizer {
        let stored = StaticOptions::from_presets(&self.config.optimizer.clip_presets);
        Optimizer::new(self.host.clone())
            .with_options_source(Arc::new(stored))
            .with_config(&self.config.optimizer, &self.config.revisions)
    }
}

/// The `{ok: false, reason}` shape optimize and undo report failures in.
fn failed(err: &RevisionError) -> Value {
    json!({ "ok": false, "reason": FailureReason::from(err) })
}

pub fn optimize(ctx: &Ctx, clip: &str, preset: Option<String>, prompt: Option<String>) -> Result<Value> {
    let options = (preset.is_some() || prompt.is_some()).then(|| OptimizeOptions {
        requested_preset_id: preset,
        user_prompt: prompt,
    });
    let report = ctx.optimizer().optimize(&ClipId::from(clip), options);
    Ok(serde_json::to_value(report)?)
}

pub fn undo(ctx: &Ctx, clip: &str) -> Result<Value> {
    let report = ctx.optimizer().undo_optimize(&ClipId::from(clip));
    Ok(serde_json::to_value(report)?)
}

pub fn clips(ctx: &Ctx) -> Result<Value> {
    let project = ctx.host.project()?;
    let clips: Vec<Value> = project
        .ordered_clips()
        .map(|clip| {
            json!({
                "clipId": clip.id,
                "name": clip.name,
                "revisionId": clip.revision_id,
                "revisions": clip.revisions.len(),
                "noteCount": clip.meta.note_count,
            })
        })
        .collect();
    Ok(json!({ "ok": true, "clips": clips }))
}

pub fn revisions(ctx: &Ctx, clip: &str) -> Result<Value> {
    let project = ctx.host.project()?;
    let clip_id = ClipId::from(clip);
    Ok(match project.clip(&clip_id) {
        Some(clip) => serde_json::to_value(list_revisions(clip))?,
        None => failed(&RevisionError::ClipNotFound(clip_id)),
    })
}

pub fn switch(ctx: &Ctx, clip: &str, revision: &str) -> Result<Value> {
    let clip_id = ClipId::from(clip);
    let mut project = ctx.host.project()?;
    let changed = match switch_active_revision(&mut project, &clip_id, &RevisionId::from(revision)) {
        Ok(changed) => changed,
        Err(err) => return Ok(failed(&err)),
    };
    if changed {
        ctx.host.commit_project(project, "switch_revision")?;
    }
    Ok(json!({ "ok": true, "changed": changed, "revisionId": revision }))
}

pub fn checkpoint(ctx: &Ctx, clip: &str, name: Option<String>) -> Result<Value> {
    let clip_id = ClipId::from(clip);
    let mut project = ctx.host.project()?;
    let opts = RevisionOptions {
        name,
        max_snapshots: ctx.config.revisions.snapshot_cap(),
    };
    let revision_id = match begin_revision(&mut project, &clip_id, &opts) {
        Ok(revision_id) => revision_id,
        Err(err) => return Ok(failed(&err)),
    };
    ctx.host.commit_project(project, "checkpoint")?;
    info!(clip_id = %clip_id, revision_id = %revision_id, "checkpoint created");
    Ok(json!({ "ok": true, "revisionId": revision_id }))
}

pub fn normalize(ctx: &Ctx) -> Result<Value> {
    let (project, report) = ctx.host.load()?;
    let rewritten = !report.is_clean();
    if rewritten {
        ctx.host.commit_project(project, "normalize")?;
    }
    Ok(json!({ "ok": true, "rewritten": rewritten, "report": report }))
}

pub fn check(ctx: &Ctx) -> Result<Value> {
    let project = ctx.host.project()?;
    Ok(match verify_revision_integrity(&project) {
        Ok(()) => json!({ "ok": true, "clips": project.clips.len() }),
        Err(violation) => json!({ "ok": false, "violation": violation.to_string() }),
    })
}

pub fn seconds(ctx: &Ctx, clip: &str) -> Result<Value> {
    let project = ctx.host.project()?;
    let bpm = resolve_bpm(project.bpm, &ctx.config.timebase);
    let clip_id = ClipId::from(clip);
    Ok(match project.clip(&clip_id) {
        Some(clip) => json!({ "ok": true, "bpm": bpm, "score": score_beat_to_sec(&clip.score, bpm) }),
        None => failed(&RevisionError::ClipNotFound(clip_id)),
    })
}
