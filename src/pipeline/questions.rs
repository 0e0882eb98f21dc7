//! Next-question selection with an anti-repetition policy.
//!
//! Prefers the first missing field that was neither the one just asked nor
//! already asked in this collection pass; re-asking is permitted only once
//! every other missing field has been tried, which prevents starvation on a
//! single stubborn field.

use super::oldcarts::FieldKey;

/// Hard cap on distinct fields asked in one collection pass. Once reached,
/// collection ends even if fields remain missing and processing proceeds to
/// risk classification. Conversational flow wins over completeness.
pub const MAX_QUESTIONS: usize = 4;

/// Prompt used when no specific field question applies.
pub const GENERIC_PROMPT: &str =
    "I understand. Could you tell me more about what's concerning you today?";

/// Pick the next field to ask about.
///
/// Returns `None` only when `missing` is empty. Never returns a key already
/// in `asked` unless `asked` covers all of `missing`.
pub fn choose_next_key(
    missing: &[FieldKey],
    last_asked: Option<FieldKey>,
    asked: &[FieldKey],
) -> Option<FieldKey> {
    missing
        .iter()
        .find(|k| Some(**k) != last_asked && !asked.contains(k))
        .or_else(|| missing.first())
        .copied()
}

/// Fixed key → question lookup.
pub fn question_for(key: FieldKey) -> &'static str {
    match key {
        FieldKey::Onset => "When did this start?",
        FieldKey::Location => "Where exactly do you feel it?",
        FieldKey::Duration => "Is it constant, or does it come and go?",
        FieldKey::Character => "How would you describe the feeling — dull, sharp, throbbing?",
        FieldKey::AggravRelieve => "Does anything make it better or worse?",
        FieldKey::Related => "Have you noticed any other symptoms alongside it?",
        FieldKey::SeverityImpact => {
            "How severe is it, and is it affecting your daily activities?"
        }
    }
}
