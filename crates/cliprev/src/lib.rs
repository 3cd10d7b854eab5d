//! Clip revision history and deterministic optimize patches.
//!
//! A clip's score is stored in beats with a per-clip revision history: one
//! active head inside a set of snapshots linked by parent ids. The
//! [`Optimizer`] builds a bounded note-level patch (a corrective pass, else
//! a named preset), validates it, applies it to a copy, and only then
//! records it as a new revision. Undo rolls the head back to its parent.
//!
//! ```text
//! ProjectHost ──► Optimizer ──► patch::build_patch ──► validate ──► apply_patch
//!      ▲              │                                               │
//!      └── commit ◄── revision::begin_revision ◄──────────────────────┘
//! ```
//!
//! Module map:
//! - [`timebase`]: beats ⇄ seconds, per note and per score
//! - [`revision`]: begin / switch / rollback / list / normalize
//! - [`patch`]: corrective pass, presets, validation, application
//! - [`optimizer`]: the optimize and undo entry points
//! - [`doc`]: load-boundary types that accept legacy document shapes
//! - [`host`]: where projects and remembered options come from

pub mod doc;
pub mod error;
pub mod host;
pub mod model;
pub mod optimizer;
pub mod patch;
pub mod revision;
pub mod timebase;

pub use doc::{project_from_json, ProjectDoc};
pub use error::{ApplyError, FailureReason, IntegrityViolation, PatchRejection, RevisionError};
pub use host::{
    FileProjectHost, InMemoryProjectHost, NoStoredOptions, OptimizeOptions, OptionsSource,
    ProjectHost, StaticOptions,
};
pub use model::{Clip, ClipId, ClipMeta, Note, Project, RevisionId, RevisionSnapshot, Score, Track};
pub use optimizer::{OptimizeFailure, OptimizeReport, Optimizer, UndoReport};
pub use patch::{Op, Patch, PatchSummary, PatchValidator, Preset, StrictValidator};
pub use revision::{
    begin_revision, commit_seconds_edit, create_clip, list_revisions, normalize_revision_chains,
    rollback_revision, switch_active_revision, verify_revision_integrity, NormalizeReport,
    RevisionOptions,
};
pub use timebase::{beat_to_sec, normalize_beat, score_beat_to_sec, score_sec_to_beat, sec_to_beat};
