//! Named presets.
//!
//! Every preset is a pure function of the clip. Presets only touch notes
//! whose relevant field is already valid; repairing is the corrective
//! pass's job.

use super::{BuilderOutput, NoteField, Op, Patch, PatchExample};
use crate::model::{Clip, Note};
use crate::timebase::{normalize_beat, BEAT_EPSILON};

const ACCENT_LOUD: f64 = 100.0;
const ACCENT_SETTLE: f64 = 80.0;
const ACCENT_STEP: f64 = 10.0;
const ACCENT_BAND: (f64, f64) = (80.0, 110.0);

const LEVEL_BAND: (f64, f64) = (70.0, 105.0);

const STUB_HIGH: f64 = 96.0;
const STUB_LOW: f64 = 64.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    DynamicsAccent,
    DynamicsLevel,
    DurationGentle,
    Noop,
    FallbackStub,
}

impl Preset {
    /// Presets that may be requested by id.
    pub const ALLOWED: [Preset; 4] = [
        Preset::DynamicsAccent,
        Preset::DynamicsLevel,
        Preset::DurationGentle,
        Preset::Noop,
    ];

    /// Look up an allow-listed preset. `fallback_stub` is not requestable.
    pub fn from_id(id: &str) -> Option<Preset> {
        Self::ALLOWED.into_iter().find(|p| p.id() == id)
    }

    pub fn id(&self) -> &'static str {
        match self {
            Preset::DynamicsAccent => "dynamics_accent",
            Preset::DynamicsLevel => "dynamics_level",
            Preset::DurationGentle => "duration_gentle",
            Preset::Noop => "noop",
            Preset::FallbackStub => "fallback_stub",
        }
    }

    pub fn build(&self, clip: &Clip) -> BuilderOutput {
        match self {
            Preset::DynamicsAccent => velocity_preset(clip, accent),
            Preset::DynamicsLevel => velocity_preset(clip, |v| v.clamp(LEVEL_BAND.0, LEVEL_BAND.1)),
            Preset::DurationGentle => duration_gentle(clip),
            Preset::Noop => BuilderOutput::empty(&clip.id),
            Preset::FallbackStub => fallback_stub(clip),
        }
    }
}

/// Loud notes settle back to the bottom of the band; the rest get a nudge up.
fn accent(velocity: f64) -> f64 {
    if velocity >= ACCENT_LOUD {
        ACCENT_SETTLE
    } else {
        (velocity + ACCENT_STEP).clamp(ACCENT_BAND.0, ACCENT_BAND.1)
    }
}

fn velocity_preset(clip: &Clip, target: impl Fn(f64) -> f64) -> BuilderOutput {
    let mut ops = Vec::new();
    let mut examples = Vec::new();
    for note in clip.score.notes().filter(|n| n.velocity_in_range()) {
        let velocity = target(note.velocity);
        if velocity == note.velocity {
            continue;
        }
        ops.push(Op::SetVelocity {
            note_id: note.id.clone(),
            velocity,
        });
        examples.push(PatchExample::new(note, NoteField::Velocity, velocity));
    }
    BuilderOutput {
        patch: Patch::with_ops(clip.id.clone(), ops),
        examples,
    }
}

/// Scale durations by 0.9, 1.0, 1.1 in rotation over note order.
fn duration_gentle(clip: &Clip) -> BuilderOutput {
    let mut ops = Vec::new();
    let mut examples = Vec::new();
    for (index, note) in clip.score.notes().enumerate() {
        if !note.duration_in_range() {
            continue;
        }
        let factor = 1.0 + 0.1 * ((index % 3) as f64 - 1.0);
        let duration = normalize_beat(note.duration_beat * factor);
        // Below the grid there is no in-bounds value to move to.
        if duration < BEAT_EPSILON || duration == normalize_beat(note.duration_beat) {
            continue;
        }
        ops.push(Op::SetDuration {
            note_id: note.id.clone(),
            duration_beat: duration,
        });
        examples.push(PatchExample::new(note, NoteField::DurationBeat, duration));
    }
    BuilderOutput {
        patch: Patch::with_ops(clip.id.clone(), ops),
        examples,
    }
}

/// Flip the first valid note's velocity between two fixed values.
fn fallback_stub(clip: &Clip) -> BuilderOutput {
    let Some(note) = clip.score.notes().find(|n| n.velocity_in_range()) else {
        return BuilderOutput::empty(&clip.id);
    };
    let velocity = toggled(note);
    BuilderOutput {
        patch: Patch::with_ops(
            clip.id.clone(),
            vec![Op::SetVelocity {
                note_id: note.id.clone(),
                velocity,
            }],
        ),
        examples: vec![PatchExample::new(note, NoteField::Velocity, velocity)],
    }
}

fn toggled(note: &Note) -> f64 {
    if note.velocity == STUB_HIGH {
        STUB_LOW
    } else {
        STUB_HIGH
    }
}
