//! Note-level patches: building, validating and applying them.
//!
//! A patch is an ordered list of ops against one clip. Ops set absolute
//! values, so validating each assigned value validates the result.
//!
//! Building goes corrective pass first, then a preset:
//!
//! ```text
//! clip ──► corrective ──(ops?)──► patch (source = corrective)
//!              │
//!              └─(empty)──► preset id on allow-list? ──► patch (source = preset | default)
//!                                    │
//!                                    └─(no)──► fallback_stub (source = fallback)
//! ```

mod apply;
mod corrective;
mod presets;
mod validate;

pub use apply::apply_patch;
pub use corrective::{build_corrective_patch, MIN_DURATION_BEAT};
pub use presets::Preset;
pub use validate::{validate_patch, PatchValidator, StrictValidator};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::doc::lenient;
use crate::error::FailureReason;
use crate::model::{is_midi_value, ClipId, Clip, Note, PITCH_MAX, PITCH_MIN, VELOCITY_MAX, VELOCITY_MIN};

/// The only patch format version this crate reads or writes.
pub const PATCH_VERSION: u32 = 1;

/// Preset id recorded when the corrective pass supplied the patch.
pub const CORRECTIVE_ID: &str = "corrective";

/// A writable note field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteField {
    Pitch,
    Velocity,
    StartBeat,
    DurationBeat,
}

impl NoteField {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteField::Pitch => "pitch",
            NoteField::Velocity => "velocity",
            NoteField::StartBeat => "startBeat",
            NoteField::DurationBeat => "durationBeat",
        }
    }

    pub fn get(&self, note: &Note) -> f64 {
        match self {
            NoteField::Pitch => note.pitch,
            NoteField::Velocity => note.velocity,
            NoteField::StartBeat => note.start_beat,
            NoteField::DurationBeat => note.duration_beat,
        }
    }

    pub fn set(&self, note: &mut Note, value: f64) {
        match self {
            NoteField::Pitch => note.pitch = value,
            NoteField::Velocity => note.velocity = value,
            NoteField::StartBeat => note.start_beat = value,
            NoteField::DurationBeat => note.duration_beat = value,
        }
    }

    /// Whether `value` is legal for this field.
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            NoteField::Pitch => is_midi_value(value, PITCH_MIN, PITCH_MAX),
            NoteField::Velocity => is_midi_value(value, VELOCITY_MIN, VELOCITY_MAX),
            NoteField::StartBeat => value.is_finite() && value >= 0.0,
            NoteField::DurationBeat => value.is_finite() && value > 0.0,
        }
    }
}

impl fmt::Display for NoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any subset of a note's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_beat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_beat: Option<f64>,
}

impl NoteUpdate {
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    pub fn assignments(&self) -> Vec<(NoteField, f64)> {
        [
            (NoteField::Pitch, self.pitch),
            (NoteField::Velocity, self.velocity),
            (NoteField::StartBeat, self.start_beat),
            (NoteField::DurationBeat, self.duration_beat),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }

    pub fn set(&mut self, field: NoteField, value: f64) {
        let slot = match field {
            NoteField::Pitch => &mut self.pitch,
            NoteField::Velocity => &mut self.velocity,
            NoteField::StartBeat => &mut self.start_beat,
            NoteField::DurationBeat => &mut self.duration_beat,
        };
        *slot = Some(value);
    }
}

/// One edit against one note.
///
/// Unknown op names fail to deserialize, so a parsed patch only ever
/// contains these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Op {
    UpdateNote { note_id: String, set: NoteUpdate },
    SetPitch { note_id: String, pitch: f64 },
    SetVelocity { note_id: String, velocity: f64 },
    SetStart { note_id: String, start_beat: f64 },
    SetDuration { note_id: String, duration_beat: f64 },
}

impl Op {
    pub fn note_id(&self) -> &str {
        match self {
            Op::UpdateNote { note_id, .. }
            | Op::SetPitch { note_id, .. }
            | Op::SetVelocity { note_id, .. }
            | Op::SetStart { note_id, .. }
            | Op::SetDuration { note_id, .. } => note_id,
        }
    }

    /// Histogram key.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::UpdateNote { .. } => "update_note",
            Op::SetPitch { .. } => "set_pitch",
            Op::SetVelocity { .. } => "set_velocity",
            Op::SetStart { .. } => "set_start",
            Op::SetDuration { .. } => "set_duration",
        }
    }

    /// Field/value pairs this op writes, in field order.
    pub fn assignments(&self) -> Vec<(NoteField, f64)> {
        match self {
            Op::UpdateNote { set, .. } => set.assignments(),
            Op::SetPitch { pitch, .. } => vec![(NoteField::Pitch, *pitch)],
            Op::SetVelocity { velocity, .. } => vec![(NoteField::Velocity, *velocity)],
            Op::SetStart { start_beat, .. } => vec![(NoteField::StartBeat, *start_beat)],
            Op::SetDuration { duration_beat, .. } => vec![(NoteField::DurationBeat, *duration_beat)],
        }
    }
}

/// An ordered list of ops against one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub version: u32,
    pub clip_id: ClipId,
    pub ops: Vec<Op>,
}

impl Patch {
    pub fn new(clip_id: ClipId) -> Self {
        Self {
            version: PATCH_VERSION,
            clip_id,
            ops: Vec::new(),
        }
    }

    pub fn with_ops(clip_id: ClipId, ops: Vec<Op>) -> Self {
        Self {
            ops,
            ..Self::new(clip_id)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Op count per op kind.
    pub fn histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for op in &self.ops {
            *histogram.entry(op.kind().to_string()).or_insert(0) += 1;
        }
        histogram
    }
}

/// Before/after values of one edited field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchExample {
    pub note_id: String,
    pub field: NoteField,
    /// NaN when the stored value was not a number; written as `null`.
    #[serde(deserialize_with = "lenient::number")]
    pub before: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub after: f64,
}

impl PatchExample {
    pub fn new(note: &Note, field: NoteField, after: f64) -> Self {
        Self {
            note_id: note.id.clone(),
            field,
            before: field.get(note),
            after,
        }
    }
}

/// What a builder produced: the patch and the edits it made, as examples.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderOutput {
    pub patch: Patch,
    pub examples: Vec<PatchExample>,
}

impl BuilderOutput {
    pub fn empty(clip_id: &ClipId) -> Self {
        Self {
            patch: Patch::new(clip_id.clone()),
            examples: Vec::new(),
        }
    }
}

/// Where a patch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    /// The corrective pass found an invalid note.
    Corrective,
    /// The requested preset was on the allow-list.
    Preset,
    /// Nothing was requested; the configured default preset ran.
    Default,
    /// The requested preset was unknown; `fallback_stub` ran.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Ok,
    Failed,
}

/// Observability record for one optimize pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    #[serde(default)]
    pub requested_preset_id: Option<String>,
    pub executed_preset_id: String,
    pub source: PatchSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub status: PatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub op_count: usize,
    #[serde(default)]
    pub histogram: BTreeMap<String, usize>,
    #[serde(default)]
    pub examples: Vec<PatchExample>,
}

impl PatchSummary {
    pub fn is_ok(&self) -> bool {
        self.status == PatchStatus::Ok
    }

    /// Mark the summary failed.
    pub fn failed(mut self, reason: FailureReason) -> Self {
        self.status = PatchStatus::Failed;
        self.reason = Some(reason);
        self
    }
}

/// A patch plus the provenance needed to summarize it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPlan {
    pub patch: Patch,
    pub requested_preset_id: Option<String>,
    pub executed_preset_id: String,
    pub source: PatchSource,
    pub fallback_reason: Option<String>,
    pub examples: Vec<PatchExample>,
}

impl PatchPlan {
    /// An ok summary for this plan, keeping at most `max_examples` examples.
    pub fn summary(&self, max_examples: usize) -> PatchSummary {
        PatchSummary {
            requested_preset_id: self.requested_preset_id.clone(),
            executed_preset_id: self.executed_preset_id.clone(),
            source: self.source,
            fallback_reason: self.fallback_reason.clone(),
            status: PatchStatus::Ok,
            reason: None,
            op_count: self.patch.len(),
            histogram: self.patch.histogram(),
            examples: self.examples.iter().take(max_examples).cloned().collect(),
        }
    }
}

/// Build the patch for one optimize pass.
///
/// The corrective pass wins whenever it finds anything. Otherwise the
/// requested preset runs if it is on the allow-list, `default_preset` runs
/// if nothing was requested, and `fallback_stub` runs for anything else.
pub fn build_patch(clip: &Clip, requested: Option<&str>, default_preset: &str) -> PatchPlan {
    let corrective = build_corrective_patch(clip);
    if !corrective.patch.is_empty() {
        debug!(clip_id = %clip.id, ops = corrective.patch.len(), "corrective pass produced a patch");
        return PatchPlan {
            patch: corrective.patch,
            requested_preset_id: requested.map(str::to_string),
            executed_preset_id: CORRECTIVE_ID.to_string(),
            source: PatchSource::Corrective,
            fallback_reason: None,
            examples: corrective.examples,
        };
    }

    let (preset, source, fallback_reason) = match requested {
        Some(id) => match Preset::from_id(id) {
            Some(preset) => (preset, PatchSource::Preset, None),
            None => (
                Preset::FallbackStub,
                PatchSource::Fallback,
                Some("unknown preset".to_string()),
            ),
        },
        None => match Preset::from_id(default_preset) {
            Some(preset) => (preset, PatchSource::Default, None),
            None => (
                Preset::FallbackStub,
                PatchSource::Fallback,
                Some("unknown preset".to_string()),
            ),
        },
    };

    debug!(
        clip_id = %clip.id,
        requested = requested.unwrap_or("-"),
        preset = preset.id(),
        ?source,
        "resolved preset"
    );

    let output = preset.build(clip);
    PatchPlan {
        patch: output.patch,
        requested_preset_id: requested.map(str::to_string),
        executed_preset_id: preset.id().to_string(),
        source,
        fallback_reason,
        examples: output.examples,
    }
}
