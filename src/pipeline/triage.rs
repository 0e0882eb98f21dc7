//! Risk classification: oracle-backed with a deterministic heuristic
//! safety net, plus the raw-text red-flag scan that short-circuits to an
//! emergency advisory before any field extraction runs.

use std::sync::LazyLock;

use regex::Regex;

use super::oldcarts::OldcartsFields;
use crate::models::{ClassificationSource, RiskAssessment, RiskBand};
use crate::oracle::Oracle;

/// Classification starts once at least this many of the seven fields are
/// populated (or the question cap ends collection early).
pub const CLASSIFICATION_FIELD_THRESHOLD: usize = 3;

/// Reply sent when a red-flag pattern matches raw inbound text. Bypasses
/// normal field extraction entirely.
pub const EMERGENCY_ADVISORY: &str = "Your message mentions symptoms that can signal a medical \
    emergency. Please call your local emergency number or go to the nearest emergency department \
    now. Do not wait for an online consultation.";

// ═══════════════════════════════════════════════════════════
// Red-flag patterns
// ═══════════════════════════════════════════════════════════

/// Ordered emergency patterns: ACS, stroke, sepsis, anaphylaxis, ectopic
/// pregnancy and friends. Any match forces at least `Urgent`.
static RED_FLAGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)worst\s+headache|thunderclap",
        r"(?i)chest\s*pain|pressure\s+in\s+chest|tightness\s+in\s+chest|crushing\s+chest",
        r"(?i)short(ness)?\s*of\s*breath|breathless|difficulty\s*breathing|can'?t\s*breathe|wheeze",
        r"(?i)one\s*side\s*weak(ness)?|one[-\s]sided\s*weak|face\s*droop|speech\s*slur|slurred\s*speech",
        r"(?i)confusion|faint(ed)?|black(ed)?\s*out|syncope",
        r"(?i)high\s*fever\s*with\s*chills|rigors|rash\s*with\s*fever",
        r"(?i)hives|swelling\s*of\s*(face|lips|tongue)|throat\s*tight",
        r"(?i)pregnan(t|cy).*bleed|severe\s*lower\s*abdominal\s*pain",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("red-flag pattern"))
    .collect()
});

/// GI-bleed language forces Urgent independent of the red-flag list.
static GI_BLEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bleed|vomit(ing)?\s*blood|black\s*tarry\s*stool").expect("GI-bleed pattern")
});

/// Raw-text emergency scan. Runs first, before any OLDCARTS processing,
/// regardless of how many fields are already known.
pub fn emergency_flag(text: &str) -> bool {
    RED_FLAGS.iter().any(|rf| rf.is_match(text))
}

// ═══════════════════════════════════════════════════════════
// Specialty selection
// ═══════════════════════════════════════════════════════════

/// Fixed, ordered specialty checks. This is not multi-label scoring: each
/// matching rule overwrites the previous result, so the LAST pattern in the
/// sequence that matches wins. Default is General Practice.
static SPECIALTY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)headache|migraine|dizzy|seizure|vertigo", "Neurology"),
        (
            r"(?i)chest\s*(pain|pressure|tight(ness)?)|palpitation|exertional\s*breath(lessness)?",
            "Cardiology",
        ),
        (
            r"(?i)(back|neck)\s*pain|joint|knee|shoulder|sprain|fracture|injury",
            "Orthopedics",
        ),
        (
            r"(?i)(abdominal|stomach|belly|gastric)\s*pain|nausea|vomit|diarrhea|acid(ity)?|reflux",
            "Gastroenterology",
        ),
        (
            r"(?i)burning\s*urination|pain\s*on\s*urination|frequent\s*urination|uti|urine\s*infection",
            "Urology",
        ),
        (
            r"(?i)rash|itch|hives|acne|eczema|psoriasis|skin\s*(lesion|infection)",
            "Dermatology",
        ),
        (
            r"(?i)(menstrual|period|vaginal)\s*(pain|bleed|discharge)|pregnan(t|cy)|pcos|fibroid",
            "Gynecology",
        ),
        (
            r"(?i)(ear|nose|throat)\s*(pain|block|discharge)|sinus|tonsil|sore\s*throat",
            "ENT",
        ),
    ]
    .iter()
    .map(|(p, s)| (Regex::new(p).expect("specialty pattern"), *s))
    .collect()
});

// ═══════════════════════════════════════════════════════════
// Heuristic fallback
// ═══════════════════════════════════════════════════════════

/// Deterministic triage over narrative + populated fields. Used whenever
/// the oracle is unavailable or returns nothing parseable.
pub fn heuristic_triage(narrative: &str, fields: &OldcartsFields) -> RiskAssessment {
    let text = format!("{narrative} {}", fields.flattened());

    let mut risk_band = RiskBand::Routine;
    if RED_FLAGS.iter().any(|rf| rf.is_match(&text)) {
        risk_band = RiskBand::Urgent;
    }
    if GI_BLEED.is_match(&text) {
        risk_band = RiskBand::Urgent;
    }

    let mut specialty = "General Practice";
    for (pattern, name) in SPECIALTY_RULES.iter() {
        if pattern.is_match(&text) {
            specialty = name;
        }
    }

    RiskAssessment {
        risk_band,
        specialty: vec![specialty.to_string()],
        care_mode: None,
        rationale: "Heuristic triage applied; generative assessment unavailable.".to_string(),
        source: ClassificationSource::Heuristic,
    }
}

/// Assessment recorded when the raw-text emergency scan fires: Emergency
/// band, specialty from the heuristic rules.
pub fn emergency_assessment(text: &str) -> RiskAssessment {
    let mut assessment = heuristic_triage(text, &OldcartsFields::default());
    assessment.risk_band = RiskBand::Emergency;
    assessment.rationale = "Red-flag pattern matched in patient message.".to_string();
    assessment
}

// ═══════════════════════════════════════════════════════════
// Oracle-backed classification
// ═══════════════════════════════════════════════════════════

/// Classify with the oracle, falling back to the heuristic. Oracle failures
/// never propagate past this point; the outcome records which path ran.
pub async fn classify(
    oracle: &dyn Oracle,
    fields: &OldcartsFields,
    narrative: &str,
) -> RiskAssessment {
    match oracle.risk_classify(fields, narrative).await {
        Ok(Some(assessment)) => assessment,
        Ok(None) => {
            tracing::info!("Oracle returned no triage verdict, using heuristic");
            heuristic_triage(narrative, fields)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Oracle triage failed, using heuristic");
            heuristic_triage(narrative, fields)
        }
    }
}
