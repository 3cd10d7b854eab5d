use super::{Patch, PATCH_VERSION};
use crate::error::PatchRejection;
use crate::model::Clip;

/// Decides whether a patch may be applied to a clip.
pub trait PatchValidator: Send + Sync {
    fn validate(&self, patch: &Patch, clip: &Clip) -> Result<(), PatchRejection>;
}

/// Structural validation: right clip, known version, every referenced note
/// exists exactly once, every assigned value is in range.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictValidator;

impl PatchValidator for StrictValidator {
    fn validate(&self, patch: &Patch, clip: &Clip) -> Result<(), PatchRejection> {
        validate_patch(patch, clip)
    }
}

pub fn validate_patch(patch: &Patch, clip: &Clip) -> Result<(), PatchRejection> {
    if patch.clip_id != clip.id {
        return Err(PatchRejection::ClipMismatch {
            patch_clip: patch.clip_id.clone(),
            clip: clip.id.clone(),
        });
    }
    if patch.version != PATCH_VERSION {
        return Err(PatchRejection::UnsupportedVersion(patch.version));
    }

    for (index, op) in patch.ops.iter().enumerate() {
        let note_id = op.note_id();
        match clip.score.notes().filter(|n| n.id == note_id).count() {
            0 => {
                return Err(PatchRejection::NoteNotFound {
                    index,
                    note_id: note_id.to_string(),
                })
            }
            1 => {}
            count => {
                return Err(PatchRejection::AmbiguousNote {
                    index,
                    note_id: note_id.to_string(),
                    count,
                })
            }
        }

        let assignments = op.assignments();
        if assignments.is_empty() {
            return Err(PatchRejection::EmptyNoteUpdate {
                index,
                note_id: note_id.to_string(),
            });
        }
        for (field, value) in assignments {
            if !field.accepts(value) {
                return Err(PatchRejection::ValueOutOfRange {
                    index,
                    note_id: note_id.to_string(),
                    field: field.as_str(),
                    value,
                });
            }
        }
    }

    Ok(())
}
