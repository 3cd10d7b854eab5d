//! Error types.
//!
//! Every error carries a stable snake_case code alongside its message so
//! callers outside Rust (the editor UI, scripts reading CLI output) can
//! branch on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ClipId, RevisionId};

/// Revision store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevisionError {
    #[error("clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("clip already exists: {0}")]
    ClipExists(ClipId),

    #[error("revision {revision_id} not found in clip {clip_id}")]
    RevisionNotFound {
        clip_id: ClipId,
        revision_id: RevisionId,
    },

    #[error("clip {0} has no parent revision to roll back to")]
    NoRollback(ClipId),
}

impl RevisionError {
    pub fn code(&self) -> &'static str {
        match self {
            RevisionError::ClipNotFound(_) => "clip_not_found",
            RevisionError::ClipExists(_) => "clip_exists",
            RevisionError::RevisionNotFound { .. } => "revision_not_found",
            RevisionError::NoRollback(_) => "no_rollback",
        }
    }
}

/// A broken revision invariant found by an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("clip {clip_id}: head {revision_id} has no stored snapshot")]
    HeadMissing {
        clip_id: ClipId,
        revision_id: RevisionId,
    },

    #[error("clip {clip_id}: parent {parent_id} of {revision_id} has no stored snapshot")]
    ParentMissing {
        clip_id: ClipId,
        revision_id: RevisionId,
        parent_id: RevisionId,
    },

    #[error("clip {clip_id}: snapshot stored under {key} claims id {revision_id}")]
    KeyMismatch {
        clip_id: ClipId,
        key: RevisionId,
        revision_id: RevisionId,
    },

    #[error("clip {clip_id}: parent chain through {revision_id} loops")]
    Cycle {
        clip_id: ClipId,
        revision_id: RevisionId,
    },
}

/// Why a validator refused a patch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchRejection {
    #[error("patch targets clip {patch_clip} but was validated against {clip}")]
    ClipMismatch { patch_clip: ClipId, clip: ClipId },

    #[error("unsupported patch version {0}")]
    UnsupportedVersion(u32),

    #[error("op {index} references unknown note {note_id}")]
    NoteNotFound { index: usize, note_id: String },

    #[error("op {index} references note {note_id}, which {count} notes share")]
    AmbiguousNote {
        index: usize,
        note_id: String,
        count: usize,
    },

    #[error("op {index} sets {field} of note {note_id} to {value}, outside its valid range")]
    ValueOutOfRange {
        index: usize,
        note_id: String,
        field: &'static str,
        value: f64,
    },

    #[error("op {index} on note {note_id} sets no fields")]
    EmptyNoteUpdate { index: usize, note_id: String },
}

impl PatchRejection {
    pub fn code(&self) -> &'static str {
        match self {
            PatchRejection::ClipMismatch { .. } => "clip_mismatch",
            PatchRejection::UnsupportedVersion(_) => "unsupported_version",
            PatchRejection::NoteNotFound { .. } => "note_not_found",
            PatchRejection::AmbiguousNote { .. } => "ambiguous_note",
            PatchRejection::ValueOutOfRange { .. } => "value_out_of_range",
            PatchRejection::EmptyNoteUpdate { .. } => "empty_note_update",
        }
    }
}

/// Why a patch could not be applied to a score.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("op {index}: note {note_id} not found")]
    NoteNotFound { index: usize, note_id: String },

    #[error("op {index}: {field} of note {note_id} would become {value}")]
    InvalidResult {
        index: usize,
        note_id: String,
        field: &'static str,
        value: f64,
    },
}

/// A failure as reported across the public boundary: `{ code, message }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: String,
    pub message: String,
}

impl FailureReason {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&RevisionError> for FailureReason {
    fn from(err: &RevisionError) -> Self {
        FailureReason::new(err.code(), err.to_string())
    }
}
