//! Beat and second conversion.
//!
//! Beats are what gets stored; seconds are what the editing surface works in.
//! Everything here is pure. Converting beats to seconds and back lands within
//! [`BEAT_EPSILON`] of where it started for any tempo in the supported range.

use clipconf::TimebaseConfig;
use serde::{Deserialize, Serialize};

use crate::model::{clamp_pitch, clamp_velocity, Note, Score, TimeSignature, Track, DEFAULT_BPM};

/// Resolution that beat values are rounded to after conversion.
pub const BEAT_EPSILON: f64 = 1e-6;

const BEAT_SCALE: f64 = 1e6;

/// Musical time in beats (quarter notes)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Beat(pub f64);

/// Physical time in seconds
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Second(pub f64);

/// `beat * 60 / bpm`
pub fn beat_to_sec(beat: Beat, bpm: f64) -> Second {
    Second(beat.0 * 60.0 / effective_bpm(bpm))
}

/// `sec * bpm / 60`
pub fn sec_to_beat(sec: Second, bpm: f64) -> Beat {
    Beat(sec.0 * effective_bpm(bpm) / 60.0)
}

/// Round onto the [`BEAT_EPSILON`] grid, dropping float noise picked up by
/// repeated conversion. Non-finite values pass through unchanged.
pub fn normalize_beat(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let rounded = (x * BEAT_SCALE).round() / BEAT_SCALE;
    // Keep -0.0 out of stored documents.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// A tempo usable as a divisor; anything else falls back to [`DEFAULT_BPM`].
pub fn effective_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        DEFAULT_BPM
    }
}

/// Tempo for a project under the configured limits: unusable values take
/// the configured default, usable ones are clamped into `[min_bpm, max_bpm]`.
pub fn resolve_bpm(bpm: f64, config: &TimebaseConfig) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        // Config may carry min_bpm > max_bpm, which f64::clamp rejects.
        bpm.max(config.min_bpm).min(config.max_bpm)
    } else {
        effective_bpm(config.default_bpm)
    }
}

// =============================================================================
// SECONDS-DOMAIN SCORE
// =============================================================================

/// A note as the editing surface sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondsNote {
    pub id: String,
    pub pitch: f64,
    pub velocity: f64,
    pub start_sec: f64,
    pub duration_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondsTrack {
    pub id: String,
    pub name: String,
    pub notes: Vec<SecondsNote>,
}

/// A score in seconds, same structure and note ids as its beat source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondsScore {
    pub tempo: f64,
    pub time_signature: TimeSignature,
    pub tracks: Vec<SecondsTrack>,
}

impl SecondsScore {
    pub fn note_mut(&mut self, id: &str) -> Option<&mut SecondsNote> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.notes.iter_mut())
            .find(|n| n.id == id)
    }
}

/// Convert a beat score to seconds at `bpm`.
pub fn score_beat_to_sec(score: &Score, bpm: f64) -> SecondsScore {
    SecondsScore {
        tempo: score.tempo,
        time_signature: score.time_signature,
        tracks: score
            .tracks
            .iter()
            .map(|track| SecondsTrack {
                id: track.id.clone(),
                name: track.name.clone(),
                notes: track
                    .notes
                    .iter()
                    .map(|note| SecondsNote {
                        id: note.id.clone(),
                        pitch: clamp_pitch(note.pitch),
                        velocity: clamp_velocity(note.velocity),
                        start_sec: beat_to_sec(Beat(note.start_beat), bpm).0,
                        duration_sec: beat_to_sec(Beat(note.duration_beat), bpm).0,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Convert a seconds score back to beats at `bpm`, normalizing beat values.
pub fn score_sec_to_beat(score: &SecondsScore, bpm: f64) -> Score {
    Score {
        tempo: score.tempo,
        time_signature: score.time_signature,
        tracks: score
            .tracks
            .iter()
            .map(|track| Track {
                id: track.id.clone(),
                name: track.name.clone(),
                notes: track
                    .notes
                    .iter()
                    .map(|note| Note {
                        id: note.id.clone(),
                        pitch: clamp_pitch(note.pitch),
                        velocity: clamp_velocity(note.velocity),
                        start_beat: normalize_beat(sec_to_beat(Second(note.start_sec), bpm).0),
                        duration_beat: normalize_beat(
                            sec_to_beat(Second(note.duration_sec), bpm).0,
                        ),
                    })
                    .collect(),
            })
            .collect(),
    }
}
