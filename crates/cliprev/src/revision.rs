//! Per-clip revision history.
//!
//! Each clip has one head pointer into a snapshot set that only grows
//! (unless a retention cap is configured):
//!
//! - **begin**: the old head is snapshotted, a new head id becomes active
//!   with the old head as its parent. The score is untouched; the caller
//!   commits new content with [`Clip::commit_head`].
//! - **switch**: the head moves to any stored snapshot. Nothing is dropped.
//! - **rollback**: the head moves to its parent, whose own parent link comes
//!   back with it, so repeated rollbacks walk toward the root.
//!
//! None of this performs I/O; it all works on an in-memory [`Project`].

use chrono::{DateTime, Utc};
use clipconf::TimebaseConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::{IntegrityViolation, RevisionError};
use crate::model::{Clip, ClipId, Project, RevisionId, RevisionSnapshot, Score};
use crate::timebase::{resolve_bpm, score_sec_to_beat, SecondsScore};

/// Options for [`begin_revision`].
#[derive(Debug, Clone, Default)]
pub struct RevisionOptions {
    /// Label stored on the new head's snapshot.
    pub name: Option<String>,
    /// Retention cap applied after the new head is allocated.
    pub max_snapshots: Option<usize>,
}

impl RevisionOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_max_snapshots(mut self, cap: Option<usize>) -> Self {
        self.max_snapshots = cap;
        self
    }
}

/// Add a clip built from an initial beat score. The clip gets a fresh root
/// revision and is appended to the clip ordering.
pub fn create_clip(
    project: &mut Project,
    id: impl Into<ClipId>,
    name: impl Into<String>,
    score: Score,
) -> Result<RevisionId, RevisionError> {
    let id = id.into();
    if project.clips.contains_key(&id) {
        return Err(RevisionError::ClipExists(id));
    }

    let clip = Clip::new(id.clone(), name, score);
    let revision_id = clip.revision_id.clone();
    project.clips.insert(id.clone(), clip);
    project.clip_order.push(id.clone());

    debug!(clip_id = %id, revision_id = %revision_id, "created clip");
    Ok(revision_id)
}

/// Snapshot the current head and make a fresh revision id the new head.
///
/// Returns the new head id. The score is left as it was.
pub fn begin_revision(
    project: &mut Project,
    clip_id: &ClipId,
    opts: &RevisionOptions,
) -> Result<RevisionId, RevisionError> {
    let clip = project
        .clip_mut(clip_id)
        .ok_or_else(|| RevisionError::ClipNotFound(clip_id.clone()))?;

    clip.sync_head_snapshot();

    let previous = clip.revision_id.clone();
    let mut next = RevisionId::generate();
    while clip.revisions.contains_key(&next) {
        next = RevisionId::generate();
    }

    clip.revision_id = next.clone();
    clip.parent_revision_id = Some(previous.clone());
    clip.revisions.insert(
        next.clone(),
        RevisionSnapshot {
            revision_id: next.clone(),
            parent_revision_id: Some(previous.clone()),
            created_at: Utc::now(),
            name: opts.name.clone(),
            score: clip.score.clone(),
            meta: clip.meta.clone(),
        },
    );

    if let Some(cap) = opts.max_snapshots {
        let evicted = compact_revisions(clip, cap);
        if evicted > 0 {
            debug!(clip_id = %clip_id, evicted, cap, "evicted old snapshots");
        }
    }

    debug!(clip_id = %clip_id, parent = %previous, revision_id = %next, "began revision");
    Ok(next)
}

/// Move the head to a stored snapshot (or to the current head, a no-op).
///
/// The live head is recorded before moving, so nothing is lost. Returns
/// whether the head actually moved.
pub fn switch_active_revision(
    project: &mut Project,
    clip_id: &ClipId,
    revision_id: &RevisionId,
) -> Result<bool, RevisionError> {
    let clip = project
        .clip_mut(clip_id)
        .ok_or_else(|| RevisionError::ClipNotFound(clip_id.clone()))?;

    if &clip.revision_id == revision_id {
        return Ok(false);
    }

    let target = clip
        .revisions
        .get(revision_id)
        .cloned()
        .ok_or_else(|| RevisionError::RevisionNotFound {
            clip_id: clip_id.clone(),
            revision_id: revision_id.clone(),
        })?;

    clip.sync_head_snapshot();
    let from = clip.revision_id.clone();
    clip.restore(&target);

    info!(clip_id = %clip_id, from = %from, to = %revision_id, "switched active revision");
    Ok(true)
}

/// Move the head to its parent. Returns the new head id.
pub fn rollback_revision(
    project: &mut Project,
    clip_id: &ClipId,
) -> Result<RevisionId, RevisionError> {
    let clip = project
        .clip(clip_id)
        .ok_or_else(|| RevisionError::ClipNotFound(clip_id.clone()))?;

    let parent = clip
        .parent_revision_id
        .clone()
        .ok_or_else(|| RevisionError::NoRollback(clip_id.clone()))?;

    switch_active_revision(project, clip_id, &parent)?;
    Ok(parent)
}

/// One row of a revision listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub revision_id: RevisionId,
    pub parent_revision_id: Option<RevisionId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub note_count: usize,
    pub active: bool,
}

/// All known revisions of a clip, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionListing {
    pub clip_id: ClipId,
    pub active_revision_id: RevisionId,
    pub revisions: Vec<RevisionEntry>,
}

/// List stored snapshots plus the live head.
pub fn list_revisions(clip: &Clip) -> RevisionListing {
    let head = clip.head_snapshot();
    let mut revisions: Vec<RevisionEntry> = clip
        .revisions
        .values()
        .filter(|s| s.revision_id != clip.revision_id)
        .chain(std::iter::once(&head))
        .map(|s| RevisionEntry {
            revision_id: s.revision_id.clone(),
            parent_revision_id: s.parent_revision_id.clone(),
            created_at: s.created_at,
            name: s.name.clone(),
            note_count: s.score.note_count(),
            active: s.revision_id == clip.revision_id,
        })
        .collect();
    revisions.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.revision_id.cmp(&b.revision_id))
    });

    RevisionListing {
        clip_id: clip.id.clone(),
        active_revision_id: clip.revision_id.clone(),
        revisions,
    }
}

/// What a normalization pass had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeReport {
    pub legacy_lists_converted: usize,
    pub head_snapshots_inserted: usize,
    pub head_links_repaired: usize,
    pub dangling_parents_cleared: usize,
    pub cycles_broken: usize,
    #[serde(default)]
    pub note_ids_assigned: usize,
}

impl NormalizeReport {
    pub fn absorb(&mut self, other: NormalizeReport) {
        self.legacy_lists_converted += other.legacy_lists_converted;
        self.head_snapshots_inserted += other.head_snapshots_inserted;
        self.head_links_repaired += other.head_links_repaired;
        self.dangling_parents_cleared += other.dangling_parents_cleared;
        self.cycles_broken += other.cycles_broken;
        self.note_ids_assigned += other.note_ids_assigned;
    }

    pub fn is_clean(&self) -> bool {
        *self == NormalizeReport::default()
    }
}

/// Repair every clip's revision chain. Idempotent.
pub fn normalize_revision_chains(project: &mut Project) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    for clip in project.clips.values_mut() {
        report.absorb(normalize_clip(clip));
    }
    if !report.is_clean() {
        warn!(?report, "repaired revision chains");
    }
    report
}

/// Repair one clip's revision chain:
///
/// - parent links that do not resolve to a stored snapshot are cleared
/// - the head gets a stored snapshot if it has none
/// - parent loops are cut
/// - blank or duplicate note ids are renamed, in the head and every snapshot
pub fn normalize_clip(clip: &mut Clip) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    report.note_ids_assigned += clip.score.assign_note_ids();
    for snapshot in clip.revisions.values_mut() {
        report.note_ids_assigned += snapshot.score.assign_note_ids();
    }

    // The head resolves even before its snapshot is inserted below.
    let mut known: BTreeSet<RevisionId> = clip.revisions.keys().cloned().collect();
    known.insert(clip.revision_id.clone());

    for (key, snapshot) in clip.revisions.iter_mut() {
        if &snapshot.revision_id != key {
            snapshot.revision_id = key.clone();
        }
        if let Some(parent) = &snapshot.parent_revision_id {
            if parent == key || !known.contains(parent) {
                snapshot.parent_revision_id = None;
                report.dangling_parents_cleared += 1;
            }
        }
    }

    if let Some(parent) = &clip.parent_revision_id {
        if parent == &clip.revision_id || !clip.revisions.contains_key(parent) {
            clip.parent_revision_id = None;
            report.dangling_parents_cleared += 1;
        }
    }

    match clip.revisions.get_mut(&clip.revision_id) {
        None => {
            clip.sync_head_snapshot();
            report.head_snapshots_inserted += 1;
        }
        Some(stored) if stored.parent_revision_id != clip.parent_revision_id => {
            stored.parent_revision_id = clip.parent_revision_id.clone();
            report.head_links_repaired += 1;
        }
        Some(_) => {}
    }

    report.cycles_broken += break_cycles(&mut clip.revisions);
    clip.parent_revision_id = clip
        .revisions
        .get(&clip.revision_id)
        .and_then(|s| s.parent_revision_id.clone());

    report
}

/// Cut the link that closes each parent loop. Returns how many were cut.
fn break_cycles(revisions: &mut BTreeMap<RevisionId, RevisionSnapshot>) -> usize {
    let mut acyclic: BTreeSet<RevisionId> = BTreeSet::new();
    let mut cut = 0;
    let ids: Vec<RevisionId> = revisions.keys().cloned().collect();

    for start in ids {
        let mut path = BTreeSet::new();
        path.insert(start.clone());
        let mut current = start;

        loop {
            let parent = match revisions.get(&current).and_then(|s| s.parent_revision_id.clone()) {
                Some(parent) => parent,
                None => break,
            };
            if acyclic.contains(&parent) {
                break;
            }
            if path.contains(&parent) {
                if let Some(snapshot) = revisions.get_mut(&current) {
                    snapshot.parent_revision_id = None;
                }
                cut += 1;
                break;
            }
            path.insert(parent.clone());
            current = parent;
        }

        acyclic.extend(path);
    }

    cut
}

/// Evict snapshots until at most `cap` remain. The head and its whole
/// ancestor chain are never evicted; other snapshots go oldest first.
/// Survivors whose parent was evicted lose that link. Returns the number
/// of snapshots evicted.
pub fn compact_revisions(clip: &mut Clip, cap: usize) -> usize {
    if clip.revisions.len() <= cap {
        return 0;
    }

    let mut protected = BTreeSet::new();
    let mut cursor = Some(clip.revision_id.clone());
    while let Some(id) = cursor {
        if !protected.insert(id.clone()) {
            break;
        }
        cursor = clip.revisions.get(&id).and_then(|s| s.parent_revision_id.clone());
    }

    let mut candidates: Vec<(DateTime<Utc>, RevisionId)> = clip
        .revisions
        .values()
        .filter(|s| !protected.contains(&s.revision_id))
        .map(|s| (s.created_at, s.revision_id.clone()))
        .collect();
    candidates.sort();

    let excess = clip.revisions.len() - cap;
    let evicted: BTreeSet<RevisionId> = candidates
        .into_iter()
        .take(excess)
        .map(|(_, id)| id)
        .collect();

    clip.revisions.retain(|id, _| !evicted.contains(id));
    for snapshot in clip.revisions.values_mut() {
        if snapshot
            .parent_revision_id
            .as_ref()
            .is_some_and(|p| evicted.contains(p))
        {
            snapshot.parent_revision_id = None;
        }
    }

    evicted.len()
}

/// Check the revision invariants for every clip: the head and every parent
/// link resolve to stored snapshots, keys match ids, and chains terminate.
pub fn verify_revision_integrity(project: &Project) -> Result<(), IntegrityViolation> {
    for clip in project.clips.values() {
        verify_clip(clip)?;
    }
    Ok(())
}

fn verify_clip(clip: &Clip) -> Result<(), IntegrityViolation> {
    if !clip.revisions.contains_key(&clip.revision_id) {
        return Err(IntegrityViolation::HeadMissing {
            clip_id: clip.id.clone(),
            revision_id: clip.revision_id.clone(),
        });
    }
    if let Some(parent) = &clip.parent_revision_id {
        if !clip.revisions.contains_key(parent) {
            return Err(IntegrityViolation::ParentMissing {
                clip_id: clip.id.clone(),
                revision_id: clip.revision_id.clone(),
                parent_id: parent.clone(),
            });
        }
    }

    for (key, snapshot) in &clip.revisions {
        if key != &snapshot.revision_id {
            return Err(IntegrityViolation::KeyMismatch {
                clip_id: clip.id.clone(),
                key: key.clone(),
                revision_id: snapshot.revision_id.clone(),
            });
        }
        if let Some(parent) = &snapshot.parent_revision_id {
            if !clip.revisions.contains_key(parent) {
                return Err(IntegrityViolation::ParentMissing {
                    clip_id: clip.id.clone(),
                    revision_id: key.clone(),
                    parent_id: parent.clone(),
                });
            }
        }

        // A chain longer than the snapshot count must revisit something.
        let mut steps = 0;
        let mut cursor = snapshot.parent_revision_id.as_ref();
        while let Some(id) = cursor {
            steps += 1;
            if steps > clip.revisions.len() {
                return Err(IntegrityViolation::Cycle {
                    clip_id: clip.id.clone(),
                    revision_id: key.clone(),
                });
            }
            cursor = clip.revisions.get(id).and_then(|s| s.parent_revision_id.as_ref());
        }
    }

    Ok(())
}

/// Commit an edit made on the seconds-domain view as a new revision.
///
/// The edited score is converted back to beats at the project tempo as
/// resolved under `timebase`, the same tempo the view is rendered at.
pub fn commit_seconds_edit(
    project: &mut Project,
    clip_id: &ClipId,
    edited: &SecondsScore,
    timebase: &TimebaseConfig,
    opts: &RevisionOptions,
) -> Result<RevisionId, RevisionError> {
    let score = score_sec_to_beat(edited, resolve_bpm(project.bpm, timebase));
    let revision_id = begin_revision(project, clip_id, opts)?;

    let clip = project
        .clip_mut(clip_id)
        .ok_or_else(|| RevisionError::ClipNotFound(clip_id.clone()))?;
    clip.commit_head(score);

    info!(clip_id = %clip_id, revision_id = %revision_id, "committed seconds edit");
    Ok(revision_id)
}
