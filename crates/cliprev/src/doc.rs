//! Load boundary for project documents.
//!
//! Documents on disk may predate the canonical shape: `revisions` was once
//! stored as a list, head ids could be missing, and parent links could point
//! at snapshots that were never saved. These types accept all of that, and
//! the conversion into [`Project`] / [`Clip`] runs the normalization pass so
//! nothing past this module ever sees a legacy shape.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::model::{Clip, ClipId, ClipMeta, Project, RevisionId, RevisionSnapshot, Score, DEFAULT_BPM};
use crate::revision::{normalize_clip, NormalizeReport};

/// Revisions as found on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredRevisions {
    Canonical(BTreeMap<RevisionId, RevisionSnapshot>),
    Legacy(Vec<RevisionSnapshot>),
}

impl Default for StoredRevisions {
    fn default() -> Self {
        StoredRevisions::Canonical(BTreeMap::new())
    }
}

impl StoredRevisions {
    pub fn is_legacy(&self) -> bool {
        matches!(self, StoredRevisions::Legacy(_))
    }

    /// Canonical map, keyed by each snapshot's own id. Later duplicates win;
    /// listed snapshots without an id get a fresh one.
    pub fn into_map(self) -> BTreeMap<RevisionId, RevisionSnapshot> {
        match self {
            StoredRevisions::Canonical(map) => map
                .into_iter()
                .map(|(key, mut snapshot)| {
                    // The map key is authoritative.
                    snapshot.revision_id = key.clone();
                    (key, snapshot)
                })
                .collect(),
            StoredRevisions::Legacy(list) => list
                .into_iter()
                .map(|mut snapshot| {
                    if snapshot.revision_id.as_str().is_empty() {
                        snapshot.revision_id = RevisionId::generate();
                    }
                    (snapshot.revision_id.clone(), snapshot)
                })
                .collect(),
        }
    }
}

/// A clip as found on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDoc {
    #[serde(default)]
    pub id: Option<ClipId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub meta: Option<ClipMeta>,
    #[serde(default)]
    pub revision_id: Option<RevisionId>,
    #[serde(default)]
    pub parent_revision_id: Option<RevisionId>,
    #[serde(default)]
    pub revisions: Option<StoredRevisions>,
}

impl ClipDoc {
    /// Convert to a canonical clip and repair its revision chain.
    pub fn into_clip(self, fallback_id: Option<&ClipId>) -> (Clip, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let revisions = self.revisions.unwrap_or_default();
        if revisions.is_legacy() {
            report.legacy_lists_converted += 1;
        }

        let id = self
            .id
            .or_else(|| fallback_id.cloned())
            .unwrap_or_else(|| ClipId::new(""));
        let meta = self.meta.unwrap_or_else(|| ClipMeta::from_score(&self.score));

        let mut clip = Clip {
            id,
            name: self.name,
            score: self.score,
            meta,
            revision_id: self.revision_id.unwrap_or_else(RevisionId::generate),
            parent_revision_id: self.parent_revision_id,
            revisions: revisions.into_map(),
        };
        report.absorb(normalize_clip(&mut clip));
        (clip, report)
    }
}

impl From<ClipDoc> for Clip {
    fn from(doc: ClipDoc) -> Self {
        doc.into_clip(None).0
    }
}

/// Clips as found on disk: keyed by id, or (older documents) a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredClips {
    Keyed(BTreeMap<ClipId, ClipDoc>),
    Listed(Vec<ClipDoc>),
}

impl Default for StoredClips {
    fn default() -> Self {
        StoredClips::Keyed(BTreeMap::new())
    }
}

/// A project document as found on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDoc {
    #[serde(default, alias = "tempo")]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub clips: StoredClips,
    #[serde(default)]
    pub clip_order: Vec<ClipId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    /// Convert a loaded document into a canonical project, reporting what
    /// had to be repaired.
    pub fn from_doc(doc: ProjectDoc) -> (Project, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let bpm = doc
            .bpm
            .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
            .unwrap_or(DEFAULT_BPM);

        let mut clips = BTreeMap::new();
        let mut listed_order = Vec::new();
        match doc.clips {
            StoredClips::Keyed(map) => {
                for (key, clip_doc) in map {
                    let (mut clip, clip_report) = clip_doc.into_clip(Some(&key));
                    report.absorb(clip_report);
                    // The map key is authoritative.
                    clip.id = key.clone();
                    clips.insert(key, clip);
                }
            }
            StoredClips::Listed(list) => {
                for clip_doc in list {
                    let (clip, clip_report) = clip_doc.into_clip(None);
                    report.absorb(clip_report);
                    listed_order.push(clip.id.clone());
                    clips.insert(clip.id.clone(), clip);
                }
            }
        }

        let requested_order = if doc.clip_order.is_empty() {
            listed_order
        } else {
            doc.clip_order
        };
        let mut clip_order: Vec<ClipId> = Vec::with_capacity(clips.len());
        for id in requested_order {
            if clips.contains_key(&id) && !clip_order.contains(&id) {
                clip_order.push(id);
            }
        }
        for id in clips.keys() {
            if !clip_order.contains(id) {
                clip_order.push(id.clone());
            }
        }

        let project = Project {
            bpm,
            clips,
            clip_order,
            extra: doc.extra,
        };
        (project, report)
    }
}

impl From<ProjectDoc> for Project {
    fn from(doc: ProjectDoc) -> Self {
        Project::from_doc(doc).0
    }
}

/// Parse a project document from JSON, normalizing on the way in.
pub fn project_from_json(json: &str) -> serde_json::Result<(Project, NormalizeReport)> {
    let doc: ProjectDoc = serde_json::from_str(json)?;
    Ok(Project::from_doc(doc))
}

/// Tolerant numeric fields.
///
/// Numbers pass through, numeric strings are parsed, anything else becomes
/// NaN. NaN serializes back out as `null`.
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        })
    }

    pub fn missing() -> f64 {
        f64::NAN
    }
}
