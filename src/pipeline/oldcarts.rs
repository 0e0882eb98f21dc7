//! OLDCARTS clinical-history fields: the seven canonical keys, merging,
//! missing-key selection, and the deterministic rule-based extractor used
//! whenever the oracle fails, times out, or returns nothing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Canonical keys
// ═══════════════════════════════════════════════════════════

/// The seven canonical OLDCARTS keys, in fixed canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Onset,
    Location,
    Duration,
    Character,
    AggravRelieve,
    Related,
    SeverityImpact,
}

impl FieldKey {
    /// Canonical order used by `missing_keys` and question selection.
    pub const CANONICAL: [FieldKey; 7] = [
        FieldKey::Onset,
        FieldKey::Location,
        FieldKey::Duration,
        FieldKey::Character,
        FieldKey::AggravRelieve,
        FieldKey::Related,
        FieldKey::SeverityImpact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Onset => "onset",
            FieldKey::Location => "location",
            FieldKey::Duration => "duration",
            FieldKey::Character => "character",
            FieldKey::AggravRelieve => "aggrav_relieve",
            FieldKey::Related => "related",
            FieldKey::SeverityImpact => "severity_impact",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Field map
// ═══════════════════════════════════════════════════════════

/// Values for the seven canonical keys. `related` is a list; everything
/// else is a nullable string. Unknown keys in oracle output are dropped
/// at deserialization, so the map can never grow beyond the seven.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OldcartsFields {
    #[serde(default)]
    pub onset: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub aggrav_relieve: Option<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub severity_impact: Option<String>,
}

impl OldcartsFields {
    /// Whether a key carries a non-null, non-empty value.
    pub fn is_populated(&self, key: FieldKey) -> bool {
        match key {
            FieldKey::Onset => non_empty(&self.onset),
            FieldKey::Location => non_empty(&self.location),
            FieldKey::Duration => non_empty(&self.duration),
            FieldKey::Character => non_empty(&self.character),
            FieldKey::AggravRelieve => non_empty(&self.aggrav_relieve),
            FieldKey::Related => !self.related.is_empty(),
            FieldKey::SeverityImpact => non_empty(&self.severity_impact),
        }
    }

    pub fn populated_count(&self) -> usize {
        FieldKey::CANONICAL
            .iter()
            .filter(|k| self.is_populated(**k))
            .count()
    }

    /// Keys still null/empty, in canonical order. Together with the
    /// populated keys this partitions the seven with no overlap.
    pub fn missing_keys(&self) -> Vec<FieldKey> {
        FieldKey::CANONICAL
            .iter()
            .copied()
            .filter(|k| !self.is_populated(*k))
            .collect()
    }

    /// One-line summary used in oracle prompts and the handoff narrative.
    pub fn summarize(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = &self.onset {
            parts.push(format!("Onset: {v}"));
        }
        if let Some(v) = &self.location {
            parts.push(format!("Location: {v}"));
        }
        if let Some(v) = &self.duration {
            parts.push(format!("Duration: {v}"));
        }
        if let Some(v) = &self.character {
            parts.push(format!("Character: {v}"));
        }
        if let Some(v) = &self.aggrav_relieve {
            parts.push(format!("Aggrav/Relieve: {v}"));
        }
        if !self.related.is_empty() {
            parts.push(format!("Related: {}", self.related.join(", ")));
        }
        if let Some(v) = &self.severity_impact {
            parts.push(format!("Impact: {v}"));
        }
        parts.join(" | ")
    }

    /// Raw populated values joined by spaces. Pattern scans use this
    /// rather than `summarize`, whose labels and `|` separators would
    /// split multi-word matches across adjacent fields.
    pub fn flattened(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(v) = &self.onset {
            parts.push(v);
        }
        if let Some(v) = &self.location {
            parts.push(v);
        }
        if let Some(v) = &self.duration {
            parts.push(v);
        }
        if let Some(v) = &self.character {
            parts.push(v);
        }
        if let Some(v) = &self.aggrav_relieve {
            parts.push(v);
        }
        for v in &self.related {
            parts.push(v);
        }
        if let Some(v) = &self.severity_impact {
            parts.push(v);
        }
        parts.join(" ")
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Combine existing fields with a new extraction result: for each key,
/// take the incoming value only if it is populated, else keep the existing.
/// Idempotent, and never introduces a key outside the canonical seven.
pub fn merge(existing: &OldcartsFields, incoming: &OldcartsFields) -> OldcartsFields {
    let mut next = existing.clone();
    for key in FieldKey::CANONICAL {
        if !incoming.is_populated(key) {
            continue;
        }
        match key {
            FieldKey::Onset => next.onset = incoming.onset.clone(),
            FieldKey::Location => next.location = incoming.location.clone(),
            FieldKey::Duration => next.duration = incoming.duration.clone(),
            FieldKey::Character => next.character = incoming.character.clone(),
            FieldKey::AggravRelieve => next.aggrav_relieve = incoming.aggrav_relieve.clone(),
            FieldKey::Related => next.related = incoming.related.clone(),
            FieldKey::SeverityImpact => next.severity_impact = incoming.severity_impact.clone(),
        }
    }
    next
}

// ═══════════════════════════════════════════════════════════
// Rule-based extraction (oracle safety net)
// ═══════════════════════════════════════════════════════════

static ONSET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"since\s+([^.,;]+)").expect("onset pattern"),
        Regex::new(r"started\s+(?:on\s+)?([^.,;]+)").expect("onset pattern"),
        Regex::new(r"for\s+the\s+past\s+([^.,;]+)").expect("onset pattern"),
    ]
});

/// Anatomical locations, checked in order; first match wins.
static LOCATION_KEYWORDS: &[&str] = &[
    "head", "headache", "chest", "left chest", "right chest", "back", "lower back", "stomach",
    "abdomen", "throat", "knee", "shoulder",
];

/// Character-of-pain descriptors, checked in order; first match wins.
static CHARACTER_KEYWORDS: &[&str] = &[
    "throbbing", "dull", "stabbing", "pressure", "burning", "sharp", "cramping",
];

static INTERMITTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"intermittent|on\s*and\s*off|episodes?").expect("duration cue"));
static CONTINUOUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"continuous|constant").expect("duration cue"));

static WORSE_WITH_LIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"worse\s+(?:with|in)\s+(?:the\s+)?light|photophobia").expect("trigger cue")
});
static BETTER_WITH_REST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"better\s+with\s+rest|rest\s+helps").expect("relief cue"));

static NAUSEA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"nausea").expect("symptom cue"));
static VOMITING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"vomit").expect("symptom cue"));
static FEVER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"fever").expect("symptom cue"));
static DIZZINESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dizziness|dizzy").expect("symptom cue"));

/// Deterministic pattern-match extraction over lower-cased text. Supplies
/// the merge input whenever the oracle is unavailable or returns nothing.
pub fn rule_based_extract(text: &str) -> OldcartsFields {
    let t = text.to_lowercase();
    let mut out = OldcartsFields::default();

    for pattern in ONSET_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&t) {
            out.onset = Some(caps[1].trim().to_string());
            break;
        }
    }

    for loc in LOCATION_KEYWORDS {
        if t.contains(loc) {
            out.location = Some((*loc).to_string());
            break;
        }
    }

    for ch in CHARACTER_KEYWORDS {
        if t.contains(ch) {
            out.character = Some((*ch).to_string());
            break;
        }
    }

    if INTERMITTENT.is_match(&t) {
        out.duration = Some("intermittent".to_string());
    } else if CONTINUOUS.is_match(&t) {
        out.duration = Some("continuous".to_string());
    }

    let mut aggrav = Vec::new();
    if WORSE_WITH_LIGHT.is_match(&t) {
        aggrav.push("worse with light");
    }
    if BETTER_WITH_REST.is_match(&t) {
        aggrav.push("relief with rest");
    }
    if !aggrav.is_empty() {
        out.aggrav_relieve = Some(aggrav.join("; "));
    }

    let mut related = Vec::new();
    if NAUSEA.is_match(&t) {
        related.push("nausea".to_string());
    }
    if VOMITING.is_match(&t) {
        related.push("vomiting".to_string());
    }
    if FEVER.is_match(&t) {
        related.push("fever".to_string());
    }
    if DIZZINESS.is_match(&t) {
        related.push("dizziness".to_string());
    }
    out.related = related;

    out
}
