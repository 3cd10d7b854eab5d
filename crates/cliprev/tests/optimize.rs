//! Optimize / undo behaviour through the public API.

use std::sync::Arc;

use cliprev::error::PatchRejection;
use cliprev::patch::{PatchSource, PatchStatus};
use cliprev::{
    create_clip, verify_revision_integrity, Clip, ClipId, InMemoryProjectHost, Note,
    OptimizeOptions, Optimizer, Patch, PatchValidator, Project, Score, Track,
};
use pretty_assertions::assert_eq;

fn project(notes: Vec<Note>) -> Project {
    let mut project = Project::new(120.0);
    let score = Score::with_tracks(120.0, vec![Track::new("t1", "Lead", notes)]);
    create_clip(&mut project, "c1", "Verse", score).unwrap();
    project
}

fn setup(notes: Vec<Note>) -> (Arc<InMemoryProjectHost>, Optimizer, ClipId) {
    let host = Arc::new(InMemoryProjectHost::new(project(notes)));
    let optimizer = Optimizer::new(host.clone());
    (host, optimizer, ClipId::from("c1"))
}

fn clip(host: &InMemoryProjectHost, id: &ClipId) -> Clip {
    host.current().clips[id].clone()
}

#[test]
fn noop_is_silent_however_often_it_runs() {
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 100, 0.0, 1.0)]);
    let before = clip(&host, &id);

    for _ in 0..5 {
        let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("noop")));
        assert!(report.ok);
        assert_eq!(report.ops, 0);
    }

    let after = clip(&host, &id);
    assert_eq!(after.revision_id, before.revision_id);
    assert_eq!(after.parent_revision_id, before.parent_revision_id);
    assert_eq!(after.revisions.len(), before.revisions.len());
    assert_eq!(host.commit_count(), 0);
}

#[test]
fn preset_with_nothing_to_change_is_silent() {
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 90, 0.0, 1.0)]);
    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("dynamics_level")));

    assert!(report.ok);
    assert_eq!(report.ops, 0);
    assert_eq!(host.commit_count(), 0);
}

#[test]
fn optimize_links_new_head_to_previous() {
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 120, 0.0, 1.0)]);
    let before = clip(&host, &id).revision_id;

    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("dynamics_level")));
    assert!(report.ok);
    assert_eq!(report.ops, 1);

    let after = clip(&host, &id);
    assert_eq!(Some(after.revision_id.clone()), report.revision_id);
    assert_eq!(after.parent_revision_id, Some(before));
    assert_eq!(host.commit_count(), 1);
    assert_eq!(host.commits()[0].reason, "optimize");
    verify_revision_integrity(&host.current()).unwrap();
}

#[test]
fn undo_restores_pre_optimize_head() {
    let (host, optimizer, id) = setup(vec![
        Note::new("n1", 60, 120, 0.0, 1.0),
        Note::new("n2", 64, 30, 1.0, 1.0),
    ]);
    let before = clip(&host, &id);

    assert_eq!(
        optimizer.optimize(&id, Some(OptimizeOptions::preset("dynamics_level"))).ops,
        2
    );
    let undo = optimizer.undo_optimize(&id);
    assert!(undo.ok);
    assert_eq!(undo.changed, Some(true));

    let after = clip(&host, &id);
    assert_eq!(after.revision_id, before.revision_id);
    assert_eq!(after.parent_revision_id, before.parent_revision_id);
    assert_eq!(after.score, before.score);
    // The optimized revision is still there to switch back to.
    assert_eq!(after.revisions.len(), 2);
    assert_eq!(host.commit_count(), 2);
}

#[test]
fn scenario_out_of_range_pitch_is_corrected() {
    let mut note = Note::new("n1", 60, 100, 0.0, 1.0);
    note.pitch = 999.0;
    let (host, optimizer, id) = setup(vec![note]);

    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("noop")));
    assert!(report.ok);
    assert_eq!(report.ops, 1);

    let clip = clip(&host, &id);
    assert_eq!(clip.score.note("n1").unwrap().pitch, 127.0);

    let audit = clip.meta.optimizer.unwrap();
    assert_eq!(audit.patch_ops, 1);
    assert_eq!(audit.patch_summary.source, PatchSource::Corrective);
    assert_eq!(audit.patch_summary.requested_preset_id.as_deref(), Some("noop"));
    assert_eq!(audit.patch_summary.status, PatchStatus::Ok);
}

#[test]
fn scenario_accent_settles_loud_note() {
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 105, 0.0, 1.0)]);

    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("dynamics_accent")));
    assert_eq!(report.ops, 1);

    let clip = clip(&host, &id);
    assert_eq!(clip.score.note("n1").unwrap().velocity, 80.0);

    let summary = report.patch_summary.unwrap();
    assert_eq!(summary.executed_preset_id, "dynamics_accent");
    assert_eq!(summary.examples.len(), 1);
    assert_eq!(summary.examples[0].note_id, "n1");
    assert_eq!(summary.examples[0].before, 105.0);
    assert_eq!(summary.examples[0].after, 80.0);
}

#[test]
fn corrective_pass_fixes_one_note_per_call() {
    let mut a = Note::new("a", 60, 100, 0.0, 1.0);
    a.velocity = 0.0;
    let mut b = Note::new("b", 60, 100, 1.0, 1.0);
    b.start_beat = -1.0;
    let (host, optimizer, id) = setup(vec![a, b]);

    assert_eq!(optimizer.optimize(&id, None).ops, 1);
    assert_eq!(clip(&host, &id).score.note("a").unwrap().velocity, 1.0);
    assert_eq!(clip(&host, &id).score.note("b").unwrap().start_beat, -1.0);

    assert_eq!(optimizer.optimize(&id, None).ops, 1);
    assert_eq!(clip(&host, &id).score.note("b").unwrap().start_beat, 0.0);

    // Clean now; the default preset is noop.
    assert_eq!(optimizer.optimize(&id, None).ops, 0);
    assert_eq!(host.commit_count(), 2);
}

#[test]
fn unknown_preset_uses_fallback() {
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 100, 0.0, 1.0)]);
    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("warmth")));

    let summary = report.patch_summary.unwrap();
    assert_eq!(summary.source, PatchSource::Fallback);
    assert_eq!(summary.executed_preset_id, "fallback_stub");
    assert_eq!(summary.fallback_reason.as_deref(), Some("unknown preset"));
    assert_eq!(clip(&host, &id).score.note("n1").unwrap().velocity, 96.0);
}

#[test]
fn shared_note_ids_are_split_before_correction() {
    let mut bad = Note::new("n1", 60, 100, 1.0, 1.0);
    bad.pitch = 999.0;
    let (host, optimizer, id) = setup(vec![Note::new("n1", 60, 100, 0.0, 1.0), bad]);

    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("noop")));
    assert_eq!(report.ops, 1);
    let pitches: Vec<f64> = clip(&host, &id).score.notes().map(|n| n.pitch).collect();
    assert_eq!(pitches, vec![60.0, 127.0]);

    // Repaired, so later passes settle.
    for _ in 0..2 {
        assert_eq!(optimizer.optimize(&id, Some(OptimizeOptions::preset("noop"))).ops, 0);
    }
    assert_eq!(clip(&host, &id).revisions.len(), 2);
    assert_eq!(host.commit_count(), 1);
}

#[test]
fn ambiguous_note_id_is_rejected_not_misapplied() {
    let mut project = project(vec![Note::new("n1", 60, 100, 0.0, 1.0)]);
    let mut bad = Note::new("n1", 60, 100, 1.0, 1.0);
    bad.pitch = 999.0;
    project.clips.get_mut(&ClipId::from("c1")).unwrap().score.tracks[0].notes.push(bad);
    let host = Arc::new(InMemoryProjectHost::new(project));
    let optimizer = Optimizer::new(host.clone());
    let before = host.current();

    let report = optimizer.optimize(&ClipId::from("c1"), None);
    assert_eq!(report.code(), Some("patch_rejected"));
    assert!(report.reason.unwrap().message.contains("ambiguous_note"));
    assert_eq!(host.current(), before);
    assert_eq!(host.commit_count(), 0);
}

struct RejectEverything;

impl PatchValidator for RejectEverything {
    fn validate(&self, patch: &Patch, _clip: &Clip) -> Result<(), PatchRejection> {
        Err(PatchRejection::UnsupportedVersion(patch.version))
    }
}

#[test]
fn rejected_patch_changes_nothing() {
    let (host, _, id) = setup(vec![Note::new("n1", 60, 120, 0.0, 1.0)]);
    let optimizer = Optimizer::new(host.clone()).with_validator(Arc::new(RejectEverything));
    let before = host.current();

    let report = optimizer.optimize(&id, Some(OptimizeOptions::preset("dynamics_level")));

    assert!(!report.ok);
    assert_eq!(report.code(), Some("patch_rejected"));
    let reason = report.reason.unwrap();
    assert!(reason.message.contains("unsupported_version"));
    let summary = report.patch_summary.unwrap();
    assert_eq!(summary.status, PatchStatus::Failed);
    assert_eq!(summary.op_count, 1);
    assert_eq!(host.current(), before);
    assert_eq!(host.commit_count(), 0);
}

#[test]
fn missing_clip_is_reported() {
    let (host, optimizer, _) = setup(vec![]);
    let report = optimizer.optimize(&ClipId::from("nope"), None);
    assert_eq!(report.code(), Some("clip_not_found"));
    assert!(report.patch_summary.is_none());

    let undo = optimizer.undo_optimize(&ClipId::from("nope"));
    assert_eq!(undo.code(), Some("clip_not_found"));
    assert_eq!(host.commit_count(), 0);
}

#[test]
fn optimizing_different_clips_keeps_both_edits() {
    let mut project = project(vec![Note::new("n1", 60, 120, 0.0, 1.0)]);
    let score = Score::with_tracks(120.0, vec![Track::new("t1", "Bass", vec![Note::new("b1", 40, 20, 0.0, 2.0)])]);
    create_clip(&mut project, "c2", "Bass", score).unwrap();
    let host = Arc::new(InMemoryProjectHost::new(project));
    let optimizer = Arc::new(Optimizer::new(host.clone()));

    let handles: Vec<_> = ["c1", "c2"]
        .into_iter()
        .map(|id| {
            let optimizer = Arc::clone(&optimizer);
            std::thread::spawn(move || {
                optimizer.optimize(&ClipId::from(id), Some(OptimizeOptions::preset("dynamics_level")))
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().ops, 1);
    }

    let project = host.current();
    assert_eq!(project.clips[&ClipId::from("c1")].score.note("n1").unwrap().velocity, 105.0);
    assert_eq!(project.clips[&ClipId::from("c2")].score.note("b1").unwrap().velocity, 70.0);
    assert_eq!(host.commit_count(), 2);
}

#[test]
fn retention_cap_applies_to_optimize() {
    let (host, _, id) = setup(vec![Note::new("n1", 60, 100, 0.0, 1.0)]);
    let optimizer_config = clipconf::OptimizerConfig::default();
    let revisions_config = clipconf::RevisionsConfig { max_snapshots: 2 };
    let optimizer = Optimizer::new(host.clone()).with_config(&optimizer_config, &revisions_config);

    // fallback_stub flips 100 -> 96 -> 64 -> 96 ..., one op every time.
    for _ in 0..4 {
        assert_eq!(optimizer.optimize(&id, Some(OptimizeOptions::preset("?"))).ops, 1);
    }
    // The head's ancestry is protected, so nothing can be evicted here.
    assert_eq!(clip(&host, &id).revisions.len(), 5);

    // Roll back twice and branch: the abandoned tip becomes evictable.
    optimizer.undo_optimize(&id);
    optimizer.undo_optimize(&id);
    optimizer.optimize(&id, Some(OptimizeOptions::preset("?")));
    // Both abandoned revisions go; head, its three ancestors stay.
    assert_eq!(clip(&host, &id).revisions.len(), 4);
    verify_revision_integrity(&host.current()).unwrap();
}
