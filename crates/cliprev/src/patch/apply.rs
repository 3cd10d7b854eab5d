use super::Patch;
use crate::error::ApplyError;
use crate::model::Clip;

/// Apply `patch` to a copy of `clip`, in op order.
///
/// The input is never touched. Fails on the first op that names a missing
/// note or would leave a field out of range; derived meta on the returned
/// clip is recomputed from the new score.
pub fn apply_patch(clip: &Clip, patch: &Patch) -> Result<Clip, ApplyError> {
    let mut next = clip.clone();

    for (index, op) in patch.ops.iter().enumerate() {
        let note_id = op.note_id();
        let note = next
            .score
            .note_mut(note_id)
            .ok_or_else(|| ApplyError::NoteNotFound {
                index,
                note_id: note_id.to_string(),
            })?;

        for (field, value) in op.assignments() {
            if !field.accepts(value) {
                return Err(ApplyError::InvalidResult {
                    index,
                    note_id: note_id.to_string(),
                    field: field.as_str(),
                    value,
                });
            }
            field.set(note, value);
        }
    }

    next.meta.refresh(&next.score);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClipId, Note, Score, Track};
    use crate::patch::Op;
    use pretty_assertions::assert_eq;

    fn clip() -> Clip {
        Clip::new(
            "c1",
            "Verse",
            Score::with_tracks(
                120.0,
                vec![Track::new(
                    "t1",
                    "Lead",
                    vec![Note::new("n1", 60, 100, 0.0, 1.0), Note::new("n2", 62, 100, 1.0, 1.0)],
                )],
            ),
        )
    }

    #[test]
    fn test_apply_leaves_input_untouched() {
        let original = clip();
        let before = original.clone();
        let patch = Patch::with_ops(
            ClipId::from("c1"),
            vec![
                Op::SetVelocity { note_id: "n1".into(), velocity: 80.0 },
                Op::SetDuration { note_id: "n2".into(), duration_beat: 3.0 },
            ],
        );

        let next = apply_patch(&original, &patch).unwrap();

        assert_eq!(original, before);
        assert_eq!(next.score.note("n1").unwrap().velocity, 80.0);
        assert_eq!(next.meta.span_beats, 4.0);
        // Revision bookkeeping is the caller's concern.
        assert_eq!(next.revision_id, original.revision_id);
    }

    #[test]
    fn test_later_ops_see_earlier_ones() {
        let patch = Patch::with_ops(
            ClipId::from("c1"),
            vec![
                Op::SetPitch { note_id: "n1".into(), pitch: 70.0 },
                Op::SetPitch { note_id: "n1".into(), pitch: 72.0 },
            ],
        );
        let next = apply_patch(&clip(), &patch).unwrap();
        assert_eq!(next.score.note("n1").unwrap().pitch, 72.0);
        assert_eq!(next.meta.pitch_max, Some(72));
    }

    #[test]
    fn test_missing_note_fails() {
        let patch = Patch::with_ops(
            ClipId::from("c1"),
            vec![Op::SetPitch { note_id: "n9".into(), pitch: 70.0 }],
        );
        assert_eq!(
            apply_patch(&clip(), &patch).unwrap_err(),
            ApplyError::NoteNotFound { index: 0, note_id: "n9".into() }
        );
    }

    #[test]
    fn test_out_of_range_result_fails() {
        let patch = Patch::with_ops(
            ClipId::from("c1"),
            vec![
                Op::SetPitch { note_id: "n1".into(), pitch: 70.0 },
                Op::SetDuration { note_id: "n2".into(), duration_beat: -1.0 },
            ],
        );
        let err = apply_patch(&clip(), &patch).unwrap_err();
        assert!(matches!(err, ApplyError::InvalidResult { index: 1, field: "durationBeat", .. }));
    }
}
