//! Revision store and file persistence through the public API.

use std::sync::Arc;

use clipconf::TimebaseConfig;
use cliprev::timebase::score_beat_to_sec;
use cliprev::{
    begin_revision, commit_seconds_edit, create_clip, list_revisions, normalize_revision_chains,
    rollback_revision, switch_active_revision, verify_revision_integrity, ClipId,
    FileProjectHost, Note, OptimizeOptions, Optimizer, Project, ProjectHost, RevisionId,
    RevisionOptions, Score, Track,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn lead(notes: Vec<Note>) -> Score {
    Score::with_tracks(120.0, vec![Track::new("t1", "Lead", notes)])
}

#[test]
fn every_operation_keeps_integrity() {
    let mut project = Project::new(120.0);
    create_clip(&mut project, "a", "A", lead(vec![Note::new("n1", 60, 100, 0.0, 1.0)])).unwrap();
    create_clip(&mut project, "b", "B", Score::default()).unwrap();
    verify_revision_integrity(&project).unwrap();

    let a = ClipId::from("a");
    let root = project.clips[&a].revision_id.clone();
    let first = begin_revision(&mut project, &a, &RevisionOptions::named("one")).unwrap();
    verify_revision_integrity(&project).unwrap();
    begin_revision(&mut project, &a, &RevisionOptions::default()).unwrap();
    verify_revision_integrity(&project).unwrap();

    switch_active_revision(&mut project, &a, &root).unwrap();
    verify_revision_integrity(&project).unwrap();
    switch_active_revision(&mut project, &a, &first).unwrap();
    assert_eq!(rollback_revision(&mut project, &a).unwrap(), root);
    verify_revision_integrity(&project).unwrap();

    let listing = list_revisions(&project.clips[&a]);
    assert_eq!(listing.revisions.len(), 3);
    assert_eq!(listing.active_revision_id, root);
    assert_eq!(listing.revisions[0].revision_id, root);
}

#[test]
fn seconds_edit_lands_on_beats() {
    let mut project = Project::new(120.0);
    create_clip(&mut project, "c1", "Verse", lead(vec![Note::new("n1", 60, 100, 0.0, 1.0)])).unwrap();
    let id = ClipId::from("c1");

    let mut view = score_beat_to_sec(&project.clips[&id].score, project.bpm);
    let note = view.note_mut("n1").unwrap();
    note.start_sec = 0.5;
    note.duration_sec = 0.25;
    commit_seconds_edit(
        &mut project,
        &id,
        &view,
        &TimebaseConfig::default(),
        &RevisionOptions::named("drag"),
    )
    .unwrap();

    let note = project.clips[&id].score.note("n1").unwrap().clone();
    assert_eq!(note.start_beat, 1.0);
    assert_eq!(note.duration_beat, 0.5);
    assert_eq!(project.clips[&id].meta.span_beats, 0.5);
}

#[test]
fn legacy_file_loads_normalized_and_saves_canonical() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let legacy = json!({
        "bpm": 120,
        "clipOrder": ["c1"],
        "clips": {
            "c1": {
                "name": "Verse",
                "revisionId": "r2",
                "parentRevisionId": "r1",
                "score": { "tempo": 120, "tracks": [{ "id": "t1", "name": "Lead", "notes": [
                    { "id": "n1", "pitch": 999, "velocity": 100, "startBeat": 0, "durationBeat": 1 }
                ]}]},
                "revisions": [
                    {
                        "revisionId": "r1",
                        "parentRevisionId": "r0",
                        "createdAt": "2024-01-01T00:00:00Z",
                        "score": { "tracks": [] }
                    }
                ]
            }
        },
        "tracks": { "muted": ["t2"] }
    });
    std::fs::write(&path, serde_json::to_string_pretty(&legacy).unwrap()).unwrap();

    let host = Arc::new(FileProjectHost::new(&path));
    let (project, report) = host.load().unwrap();
    assert_eq!(report.legacy_lists_converted, 1);
    assert_eq!(report.head_snapshots_inserted, 1);
    assert_eq!(report.dangling_parents_cleared, 1);
    verify_revision_integrity(&project).unwrap();

    let optimizer = Optimizer::new(host.clone());
    let result = optimizer.optimize(&ClipId::from("c1"), Some(OptimizeOptions::preset("noop")));
    assert!(result.ok);
    assert_eq!(result.ops, 1);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let clip = &saved["clips"]["c1"];
    assert!(clip["revisions"].is_object());
    assert_eq!(clip["revisions"].as_object().unwrap().len(), 3);
    assert_eq!(clip["parentRevisionId"], json!("r2"));
    assert_eq!(clip["score"]["tracks"][0]["notes"][0]["pitch"], json!(127.0));
    assert_eq!(saved["tracks"], json!({ "muted": ["t2"] }));

    let (reloaded, report) = host.load().unwrap();
    assert!(report.is_clean());
    assert_eq!(reloaded, host.project().unwrap());

    let undo = optimizer.undo_optimize(&ClipId::from("c1"));
    assert!(undo.ok);
    assert_eq!(undo.revision_id, Some(RevisionId::from("r2")));
}

#[test]
fn normalize_repairs_hand_built_damage() {
    let mut project = Project::new(120.0);
    create_clip(&mut project, "c1", "Verse", Score::default()).unwrap();
    let id = ClipId::from("c1");
    {
        let clip = project.clips.get_mut(&id).unwrap();
        clip.revisions.clear();
        clip.parent_revision_id = Some(RevisionId::from("lost"));
    }
    assert!(verify_revision_integrity(&project).is_err());

    let report = normalize_revision_chains(&mut project);
    assert!(!report.is_clean());
    verify_revision_integrity(&project).unwrap();
    assert!(normalize_revision_chains(&mut project).is_clean());
}
