//! Project, clip and score types.
//!
//! Scores are stored in beats. Note fields are kept as `f64` because project
//! documents come from outside and may carry garbage (999 for a pitch, a
//! string, a null); the corrective patch pass is what repairs them, so the
//! model has to be able to hold them first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::doc::{lenient, ClipDoc, ProjectDoc};
use crate::patch::PatchSummary;

pub const PITCH_MIN: f64 = 0.0;
pub const PITCH_MAX: f64 = 127.0;
pub const VELOCITY_MIN: f64 = 1.0;
pub const VELOCITY_MAX: f64 = 127.0;

/// Tempo assumed when a document carries none.
pub const DEFAULT_BPM: f64 = 120.0;

/// Substitutes for values that are not numbers at all.
pub const DEFAULT_PITCH: f64 = 60.0;
pub const DEFAULT_VELOCITY: f64 = 100.0;

// =============================================================================
// IDS
// =============================================================================

/// Clip identifier, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Revision identifier, unique within a clip.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh id (`rev_` + 32 hex chars).
    pub fn generate() -> Self {
        Self(format!("rev_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// SCORE
// =============================================================================

/// A single note in beat time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique within a score once loaded; see [`Score::assign_note_ids`].
    #[serde(default)]
    pub id: String,
    #[serde(default = "lenient::missing", deserialize_with = "lenient::number")]
    pub pitch: f64,
    #[serde(default = "lenient::missing", deserialize_with = "lenient::number")]
    pub velocity: f64,
    #[serde(default = "lenient::missing", deserialize_with = "lenient::number")]
    pub start_beat: f64,
    #[serde(default = "lenient::missing", deserialize_with = "lenient::number")]
    pub duration_beat: f64,
}

impl Note {
    pub fn new(id: impl Into<String>, pitch: u8, velocity: u8, start_beat: f64, duration_beat: f64) -> Self {
        Self {
            id: id.into(),
            pitch: f64::from(pitch),
            velocity: f64::from(velocity),
            start_beat,
            duration_beat,
        }
    }

    pub fn pitch_in_range(&self) -> bool {
        is_midi_value(self.pitch, PITCH_MIN, PITCH_MAX)
    }

    pub fn velocity_in_range(&self) -> bool {
        is_midi_value(self.velocity, VELOCITY_MIN, VELOCITY_MAX)
    }

    pub fn start_in_range(&self) -> bool {
        self.start_beat.is_finite() && self.start_beat >= 0.0
    }

    pub fn duration_in_range(&self) -> bool {
        self.duration_beat.is_finite() && self.duration_beat > 0.0
    }

    /// All four fields finite and inside their domains.
    pub fn is_valid(&self) -> bool {
        self.pitch_in_range()
            && self.velocity_in_range()
            && self.start_in_range()
            && self.duration_in_range()
    }

    /// MIDI pitch, if the stored value is a valid one.
    pub fn midi_pitch(&self) -> Option<u8> {
        self.pitch_in_range().then_some(self.pitch as u8)
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beat
    }
}

/// Integer-valued and inside `[min, max]`.
pub(crate) fn is_midi_value(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && (min..=max).contains(&value)
}

/// Nearest valid MIDI pitch. Non-numbers become [`DEFAULT_PITCH`].
pub fn clamp_pitch(pitch: f64) -> f64 {
    if pitch.is_finite() {
        pitch.round().clamp(PITCH_MIN, PITCH_MAX)
    } else {
        DEFAULT_PITCH
    }
}

/// Nearest valid MIDI velocity. Non-numbers become [`DEFAULT_VELOCITY`].
pub fn clamp_velocity(velocity: f64) -> f64 {
    if velocity.is_finite() {
        velocity.round().clamp(VELOCITY_MIN, VELOCITY_MAX)
    } else {
        DEFAULT_VELOCITY
    }
}

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, notes: Vec<Note>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            notes,
        }
    }
}

/// A note-based score in beat time. This is the storage truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    #[serde(default = "default_bpm", deserialize_with = "lenient::number")]
    pub tempo: f64,
    #[serde(default)]
    pub time_signature: TimeSignature,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

impl Default for Score {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_BPM,
            time_signature: TimeSignature::default(),
            tracks: Vec::new(),
        }
    }
}

impl Score {
    pub fn with_tracks(tempo: f64, tracks: Vec<Track>) -> Self {
        Self {
            tempo,
            time_signature: TimeSignature::default(),
            tracks,
        }
    }

    /// Notes in track order, then note order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.tracks.iter().flat_map(|t| t.notes.iter())
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes().find(|n| n.id == id)
    }

    pub fn note_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.notes.iter_mut())
            .find(|n| n.id == id)
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }

    /// Give every note a unique, non-empty id. The first holder of an id
    /// keeps it; later duplicates and blank ids get `<id>_<n>` (or
    /// `note_<n>`) with the lowest free `n`. Returns how many were changed.
    pub fn assign_note_ids(&mut self) -> usize {
        let mut taken: BTreeSet<String> = self.notes().map(|n| n.id.clone()).collect();
        let mut seen = BTreeSet::new();
        let mut assigned = 0;

        for note in self.tracks.iter_mut().flat_map(|t| t.notes.iter_mut()) {
            if !note.id.is_empty() && seen.insert(note.id.clone()) {
                continue;
            }
            let base = if note.id.is_empty() { "note" } else { note.id.as_str() };
            let mut n = if note.id.is_empty() { 1 } else { 2 };
            let fresh = loop {
                let candidate = format!("{base}_{n}");
                if !taken.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            taken.insert(fresh.clone());
            seen.insert(fresh.clone());
            note.id = fresh;
            assigned += 1;
        }

        assigned
    }
}

// =============================================================================
// CLIP
// =============================================================================

/// Audit trail left by the last successful optimize on a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerAudit {
    /// Head the patch was computed from.
    pub source_revision_id: RevisionId,
    pub optimized_at: DateTime<Utc>,
    pub patch_ops: usize,
    /// Length of the free-text prompt, if one was given. The prompt itself
    /// is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_len: Option<usize>,
    pub patch_summary: PatchSummary,
}

/// Stats derived from the beat score, plus optimizer audit info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipMeta {
    #[serde(default)]
    pub note_count: usize,
    #[serde(default)]
    pub pitch_min: Option<u8>,
    #[serde(default)]
    pub pitch_max: Option<u8>,
    /// First onset to last release, in beats.
    #[serde(default)]
    pub span_beats: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerAudit>,
}

impl ClipMeta {
    /// Recompute the derived stats from a score. Audit info is not touched.
    pub fn from_score(score: &Score) -> Self {
        let mut meta = Self::default();
        meta.refresh(score);
        meta
    }

    pub fn refresh(&mut self, score: &Score) {
        self.note_count = score.note_count();
        self.pitch_min = score.notes().filter_map(Note::midi_pitch).min();
        self.pitch_max = score.notes().filter_map(Note::midi_pitch).max();

        let timed = || {
            score
                .notes()
                .filter(|n| n.start_in_range() && n.duration_in_range())
        };
        let first_onset = timed().map(|n| n.start_beat).fold(f64::INFINITY, f64::min);
        let last_release = timed().map(Note::end_beat).fold(f64::NEG_INFINITY, f64::max);
        self.span_beats = if first_onset.is_finite() && last_release.is_finite() {
            crate::timebase::normalize_beat(last_release - first_onset)
        } else {
            0.0
        };
    }
}

/// Immutable copy of a clip's score and meta at one point in its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSnapshot {
    /// Filled from the map key (or generated) at load time when absent.
    #[serde(default)]
    pub revision_id: RevisionId,
    #[serde(default)]
    pub parent_revision_id: Option<RevisionId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub meta: ClipMeta,
}

/// A clip and its revision history.
///
/// `revision_id` is the head. `revisions` always holds a snapshot for the
/// head (kept in step by [`Clip::commit_head`]) and every revision the
/// clip has moved away from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ClipDoc")]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    pub score: Score,
    pub meta: ClipMeta,
    pub revision_id: RevisionId,
    pub parent_revision_id: Option<RevisionId>,
    pub revisions: BTreeMap<RevisionId, RevisionSnapshot>,
}

impl Clip {
    /// Build a clip from an initial beat score, with a fresh root revision.
    /// Duplicate or blank note ids are renamed first.
    pub fn new(id: impl Into<ClipId>, name: impl Into<String>, mut score: Score) -> Self {
        score.assign_note_ids();
        let meta = ClipMeta::from_score(&score);
        let mut clip = Self {
            id: id.into(),
            name: name.into(),
            score,
            meta,
            revision_id: RevisionId::generate(),
            parent_revision_id: None,
            revisions: BTreeMap::new(),
        };
        clip.sync_head_snapshot();
        clip
    }

    /// Snapshot of the current head state (not necessarily stored).
    pub fn head_snapshot(&self) -> RevisionSnapshot {
        let stored = self.revisions.get(&self.revision_id);
        RevisionSnapshot {
            revision_id: self.revision_id.clone(),
            parent_revision_id: self.parent_revision_id.clone(),
            created_at: stored.map(|s| s.created_at).unwrap_or_else(Utc::now),
            name: stored.and_then(|s| s.name.clone()),
            score: self.score.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Write the live head state into `revisions`, keeping the stored
    /// snapshot's creation time and name.
    pub fn sync_head_snapshot(&mut self) {
        let snapshot = self.head_snapshot();
        self.revisions.insert(self.revision_id.clone(), snapshot);
    }

    /// Replace the head's score, recompute derived meta, and record the
    /// result in the head snapshot.
    pub fn commit_head(&mut self, score: Score) {
        self.score = score;
        self.meta.refresh(&self.score);
        self.sync_head_snapshot();
    }

    /// Load a snapshot's content and links as the live head.
    pub(crate) fn restore(&mut self, snapshot: &RevisionSnapshot) {
        self.revision_id = snapshot.revision_id.clone();
        self.parent_revision_id = snapshot.parent_revision_id.clone();
        self.score = snapshot.score.clone();
        self.meta = snapshot.meta.clone();
    }
}

// =============================================================================
// PROJECT
// =============================================================================

/// The project document: tempo, clips, clip ordering, and whatever else the
/// editor keeps there (passed through untouched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ProjectDoc")]
pub struct Project {
    pub bpm: f64,
    pub clips: BTreeMap<ClipId, Clip>,
    pub clip_order: Vec<ClipId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl Project {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            clips: BTreeMap::new(),
            clip_order: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn clip(&self, id: &ClipId) -> Option<&Clip> {
        self.clips.get(id)
    }

    pub fn clip_mut(&mut self, id: &ClipId) -> Option<&mut Clip> {
        self.clips.get_mut(id)
    }

    /// Clips in display order; clips missing from the ordering come last.
    pub fn ordered_clips(&self) -> impl Iterator<Item = &Clip> {
        let listed = self.clip_order.iter().filter_map(|id| self.clips.get(id));
        let unlisted = self
            .clips
            .values()
            .filter(|c| !self.clip_order.contains(&c.id));
        listed.chain(unlisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score() -> Score {
        Score::with_tracks(
            120.0,
            vec![Track::new(
                "t1",
                "Lead",
                vec![
                    Note::new("n1", 60, 100, 0.0, 1.0),
                    Note::new("n2", 67, 90, 2.0, 0.5),
                ],
            )],
        )
    }

    #[test]
    fn test_new_clip_records_head_snapshot() {
        let clip = Clip::new("c1", "Intro", score());
        assert!(clip.revisions.contains_key(&clip.revision_id));
        assert_eq!(clip.parent_revision_id, None);
        assert_eq!(clip.revisions.len(), 1);
    }

    #[test]
    fn test_meta_from_score() {
        let meta = ClipMeta::from_score(&score());
        assert_eq!(meta.note_count, 2);
        assert_eq!(meta.pitch_min, Some(60));
        assert_eq!(meta.pitch_max, Some(67));
        assert_eq!(meta.span_beats, 2.5);
    }

    #[test]
    fn test_meta_ignores_out_of_range_pitch() {
        let mut s = score();
        s.tracks[0].notes[1].pitch = 999.0;
        let meta = ClipMeta::from_score(&s);
        assert_eq!(meta.note_count, 2);
        assert_eq!(meta.pitch_max, Some(60));
    }

    #[test]
    fn test_note_validity() {
        let mut note = Note::new("n", 60, 100, 0.0, 1.0);
        assert!(note.is_valid());
        note.velocity = 0.0;
        assert!(!note.velocity_in_range());
        note.velocity = 64.5;
        assert!(!note.velocity_in_range());
        note.velocity = 64.0;
        note.duration_beat = f64::INFINITY;
        assert!(!note.is_valid());
    }

    #[test]
    fn test_commit_head_updates_snapshot() {
        let mut clip = Clip::new("c1", "Intro", score());
        let mut next = clip.score.clone();
        next.tracks[0].notes.pop();
        clip.commit_head(next.clone());

        let stored = &clip.revisions[&clip.revision_id];
        assert_eq!(stored.score, next);
        assert_eq!(clip.meta.note_count, 1);
    }

    #[test]
    fn test_assign_note_ids_renames_duplicates_and_blanks() {
        let mut s = Score::with_tracks(
            120.0,
            vec![
                Track::new(
                    "t1",
                    "Lead",
                    vec![
                        Note::new("n1", 60, 100, 0.0, 1.0),
                        Note::new("n1", 62, 100, 1.0, 1.0),
                        Note::new("n1_2", 64, 100, 2.0, 1.0),
                    ],
                ),
                Track::new("t2", "Bass", vec![Note::new("", 40, 100, 0.0, 1.0), Note::new("n1", 41, 100, 1.0, 1.0)]),
            ],
        );

        assert_eq!(s.assign_note_ids(), 3);
        let ids: Vec<_> = s.notes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n1_3", "n1_2", "note_1", "n1_4"]);

        // Already unique: nothing to do.
        assert_eq!(s.assign_note_ids(), 0);
    }

    #[test]
    fn test_new_clip_makes_note_ids_unique() {
        let s = Score::with_tracks(
            120.0,
            vec![Track::new("t1", "Lead", vec![Note::new("n1", 60, 100, 0.0, 1.0), Note::new("n1", 62, 100, 1.0, 1.0)])],
        );
        let clip = Clip::new("c1", "Intro", s);
        assert_eq!(clip.score.tracks[0].notes[1].id, "n1_2");
        assert_eq!(clip.revisions[&clip.revision_id].score, clip.score);
    }

    #[test]
    fn test_ordered_clips_puts_unlisted_last() {
        let mut project = Project::default();
        for id in ["a", "b", "c"] {
            let clip = Clip::new(id, id, Score::default());
            project.clips.insert(clip.id.clone(), clip);
        }
        project.clip_order = vec![ClipId::from("c"), ClipId::from("a")];
        let order: Vec<_> = project.ordered_clips().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
