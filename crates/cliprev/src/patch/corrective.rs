//! Corrective pass: repair the first note with an out-of-domain field.
//!
//! One note per pass. Each optimize call repairs the next defect, so a clip
//! with several broken notes converges over several calls.

use super::{BuilderOutput, NoteField, NoteUpdate, Op, Patch, PatchExample};
use crate::model::{clamp_pitch, clamp_velocity, Clip, Note};

/// Duration given to notes whose stored duration is zero or negative.
pub const MIN_DURATION_BEAT: f64 = 0.0625;

/// Duration given to notes whose stored duration is not a number.
const FALLBACK_DURATION_BEAT: f64 = 1.0;

/// Build a single-op patch for the first invalid note, or an empty patch.
pub fn build_corrective_patch(clip: &Clip) -> BuilderOutput {
    let Some(note) = clip.score.notes().find(|n| !n.is_valid()) else {
        return BuilderOutput::empty(&clip.id);
    };

    let mut update = NoteUpdate::default();
    let mut examples = Vec::new();
    for (field, repaired) in repairs(note) {
        update.set(field, repaired);
        examples.push(PatchExample::new(note, field, repaired));
    }

    let op = Op::UpdateNote {
        note_id: note.id.clone(),
        set: update,
    };
    BuilderOutput {
        patch: Patch::with_ops(clip.id.clone(), vec![op]),
        examples,
    }
}

fn repairs(note: &Note) -> Vec<(NoteField, f64)> {
    let mut out = Vec::new();
    if !note.pitch_in_range() {
        out.push((NoteField::Pitch, clamp_pitch(note.pitch)));
    }
    if !note.velocity_in_range() {
        out.push((NoteField::Velocity, clamp_velocity(note.velocity)));
    }
    if !note.start_in_range() {
        out.push((NoteField::StartBeat, 0.0));
    }
    if !note.duration_in_range() {
        let duration = if note.duration_beat.is_finite() {
            MIN_DURATION_BEAT
        } else {
            FALLBACK_DURATION_BEAT
        };
        out.push((NoteField::DurationBeat, duration));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Score, Track};
    use pretty_assertions::assert_eq;

    fn clip(notes: Vec<Note>) -> Clip {
        Clip::new("c1", "Verse", Score::with_tracks(120.0, vec![Track::new("t1", "Lead", notes)]))
    }

    #[test]
    fn test_clean_clip_yields_empty_patch() {
        let output = build_corrective_patch(&clip(vec![Note::new("n1", 60, 100, 0.0, 1.0)]));
        assert!(output.patch.is_empty());
        assert!(output.examples.is_empty());
    }

    #[test]
    fn test_stops_at_first_invalid_note() {
        let mut first = Note::new("n2", 60, 100, 1.0, 1.0);
        first.pitch = 999.0;
        let mut second = Note::new("n3", 60, 100, 2.0, 1.0);
        second.velocity = 0.0;

        let output = build_corrective_patch(&clip(vec![
            Note::new("n1", 60, 100, 0.0, 1.0),
            first,
            second,
        ]));

        assert_eq!(output.patch.len(), 1);
        assert_eq!(
            output.patch.ops[0],
            Op::UpdateNote {
                note_id: "n2".into(),
                set: NoteUpdate {
                    pitch: Some(127.0),
                    ..NoteUpdate::default()
                },
            }
        );
        assert_eq!(output.examples[0].before, 999.0);
        assert_eq!(output.examples[0].after, 127.0);
    }

    #[test]
    fn test_repairs_every_bad_field_of_the_note() {
        let note = Note {
            id: "n1".into(),
            pitch: f64::NAN,
            velocity: 300.0,
            start_beat: -2.0,
            duration_beat: f64::INFINITY,
        };
        let output = build_corrective_patch(&clip(vec![note]));

        assert_eq!(
            output.patch.ops[0].assignments(),
            vec![
                (NoteField::Pitch, 60.0),
                (NoteField::Velocity, 127.0),
                (NoteField::StartBeat, 0.0),
                (NoteField::DurationBeat, 1.0),
            ]
        );
        assert_eq!(output.examples.len(), 4);
    }

    #[test]
    fn test_zero_duration_gets_minimum() {
        let output = build_corrective_patch(&clip(vec![Note::new("n1", 60, 100, 0.0, 0.0)]));
        assert_eq!(
            output.patch.ops[0].assignments(),
            vec![(NoteField::DurationBeat, MIN_DURATION_BEAT)]
        );
    }

    #[test]
    fn test_fractional_pitch_is_rounded() {
        let mut note = Note::new("n1", 60, 100, 0.0, 1.0);
        note.pitch = 64.6;
        let output = build_corrective_patch(&clip(vec![note]));
        assert_eq!(output.patch.ops[0].assignments(), vec![(NoteField::Pitch, 65.0)]);
    }
}
