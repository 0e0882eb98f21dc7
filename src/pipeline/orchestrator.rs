//! The per-message unit of work.
//!
//! dedup → session lookup → emergency scan → extraction → question
//! selection or risk classification → booking transition → exactly one
//! reply. Returns `None` only for deliberate no-ops (duplicates, failed
//! media analysis); no internal failure surfaces to the transport.

use std::sync::Arc;

use crate::dedup::InboundDeduplicator;
use crate::models::{ChatEntry, RiskBand, Stage};
use crate::oracle::Oracle;
use crate::session::{Session, SessionStore};

use super::booking;
use super::oldcarts::{self, rule_based_extract};
use super::questions;
use super::summary::{self, HandoffContext};
use super::triage;

/// Reply for messages arriving after a confirmed booking. `Completed` is a
/// closed ticket: no re-entry into the booking flow.
const CLOSED_TICKET_REPLY: &str = "Your booking is confirmed and a clinician will be in touch. \
    If you have a new health concern, please message us from a new conversation.";

const SELF_CARE_FALLBACK: &str = "Your symptoms sound manageable with rest and self-care for \
    now. If they worsen or persist beyond a few days, please consult a doctor.";

const INTERACTIVE_FALLBACK: &str =
    "I understand. Is there anything else I can help you with regarding your health concern?";

/// Orchestrates the full pipeline for one user message at a time.
///
/// Per-session mutual exclusion is enforced by holding the session's mutex
/// across the whole run; distinct users proceed fully in parallel.
pub struct ConversationPipeline {
    store: SessionStore,
    dedup: InboundDeduplicator,
    oracle: Arc<dyn Oracle>,
}

impl ConversationPipeline {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            store: SessionStore::new(),
            dedup: InboundDeduplicator::new(),
            oracle,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// Process one inbound text message. `None` means the message was
    /// absorbed (duplicate delivery) and must produce no reply and no
    /// further effect.
    pub async fn handle_inbound_text(
        &self,
        user_id: &str,
        message_id: Option<&str>,
        text: &str,
    ) -> Option<String> {
        if self.duplicate_at_boundary(message_id) {
            return None;
        }

        let session_arc = self.store.get_or_create(user_id);
        let mut session = session_arc.lock().await;
        if Self::duplicate_in_session(&mut session, message_id) {
            return None;
        }

        session.turn_count += 1;
        session.push_history(ChatEntry::patient(text));

        // Safety net first: an emergency pattern in raw text bypasses all
        // OLDCARTS processing, regardless of stage or known fields.
        if triage::emergency_flag(text) {
            tracing::warn!(user_id = %user_id, "Emergency red flag in inbound text");
            session.risk_assessment = Some(triage::emergency_assessment(text));
            let reply = triage::EMERGENCY_ADVISORY.to_string();
            session.push_history(ChatEntry::clinician(&reply));
            return Some(reply);
        }

        if session.stage == Stage::Completed {
            let reply = CLOSED_TICKET_REPLY.to_string();
            session.push_history(ChatEntry::clinician(&reply));
            return Some(reply);
        }

        if session.stage.is_booking() {
            let turn = booking::apply_booking_turn(&mut session, text);
            if turn.just_confirmed {
                self.fire_handoff(&session);
            }
            session.push_history(ChatEntry::clinician(&turn.reply));
            return Some(turn.reply);
        }

        // Intake: extract and merge fields. Oracle first; the rule-based
        // extractor covers every oracle failure mode.
        let incoming = match self.oracle.structured_extract(text, &session.fields).await {
            Ok(Some(fields)) => fields,
            Ok(None) => rule_based_extract(text),
            Err(e) => {
                tracing::debug!(error = %e, "Structured extraction unavailable, using rules");
                rule_based_extract(text)
            }
        };
        session.fields = oldcarts::merge(&session.fields, &incoming);

        if session.risk_assessment.is_none() {
            let populated = session.fields.populated_count();
            let cap_reached = session.asked_keys.len() >= questions::MAX_QUESTIONS;
            if populated >= triage::CLASSIFICATION_FIELD_THRESHOLD || cap_reached {
                let assessment =
                    triage::classify(self.oracle.as_ref(), &session.fields, text).await;
                tracing::info!(
                    user_id = %user_id,
                    risk_band = assessment.risk_band.as_str(),
                    source = ?assessment.source,
                    "Risk classification complete"
                );
                session.risk_assessment = Some(assessment);
                // Entering classification ends the collection pass.
                session.asked_keys.clear();
                session.last_asked_key = None;
            }
        }

        let reply = match session.risk_assessment.clone() {
            Some(assessment) if assessment.risk_band != RiskBand::SelfCare => {
                let specialty = assessment.primary_specialty().to_string();
                session.stage = Stage::BookingRegion;
                session.booking.specialty = Some(specialty.clone());
                booking::booking_start_reply(&specialty)
            }
            Some(_) => match self.oracle.freeform_turn(&session.history, text).await {
                Ok(Some(turn)) => turn,
                _ => SELF_CARE_FALLBACK.to_string(),
            },
            None => self.next_question(&mut session).await,
        };

        session.push_history(ChatEntry::clinician(&reply));
        Some(reply)
    }

    /// Interactive button replies. Legacy booking buttons jump straight
    /// into the booking flow, seeded with the assessed specialty.
    pub async fn handle_interactive_option(
        &self,
        user_id: &str,
        message_id: Option<&str>,
        option_id: &str,
    ) -> Option<String> {
        if self.duplicate_at_boundary(message_id) {
            return None;
        }

        let session_arc = self.store.get_or_create(user_id);
        let mut session = session_arc.lock().await;
        if Self::duplicate_in_session(&mut session, message_id) {
            return None;
        }

        session.turn_count += 1;
        session.push_history(ChatEntry::patient(option_id));

        // Completed is terminal for button presses too.
        if session.stage == Stage::Completed {
            let reply = CLOSED_TICKET_REPLY.to_string();
            session.push_history(ChatEntry::clinician(&reply));
            return Some(reply);
        }

        let reply = if option_id == "book_tele" || option_id == "book_inperson" {
            let specialty = session
                .risk_assessment
                .as_ref()
                .map(|a| a.primary_specialty().to_string())
                .unwrap_or_else(|| "General Practice".to_string());
            session.stage = Stage::BookingRegion;
            session.booking.specialty = Some(specialty.clone());
            booking::booking_start_reply(&specialty)
        } else {
            INTERACTIVE_FALLBACK.to_string()
        };

        session.push_history(ChatEntry::clinician(&reply));
        Some(reply)
    }

    /// Attached document/image analysis. Analysis failure is a deliberate
    /// no-op: skipped with a log, no reply, no mutation.
    pub async fn handle_document(
        &self,
        user_id: &str,
        message_id: Option<&str>,
        base64_data: &str,
        mime_type: &str,
    ) -> Option<String> {
        if self.duplicate_at_boundary(message_id) {
            return None;
        }

        let session_arc = self.store.get_or_create(user_id);
        let mut session = session_arc.lock().await;
        if Self::duplicate_in_session(&mut session, message_id) {
            return None;
        }

        match self.oracle.document_analyze(base64_data, mime_type).await {
            Ok(Some(findings)) => {
                let rendered = serde_json::to_string(&findings.findings).unwrap_or_default();
                let reply = format!(
                    "I analyzed the report. Key points: {}",
                    truncate_chars(&rendered, 900)
                );
                session.attachments.push(findings);
                session.push_history(ChatEntry::clinician(&reply));
                Some(reply)
            }
            Ok(None) => {
                tracing::warn!(user_id = %user_id, "Document analysis returned nothing, skipping");
                None
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Document analysis failed, skipping");
                None
            }
        }
    }

    /// Ask about the next missing field, honoring the anti-repetition
    /// policy. Oracle phrasing preferred, fixed table as fallback.
    async fn next_question(&self, session: &mut Session) -> String {
        let missing = session.fields.missing_keys();
        let Some(key) =
            questions::choose_next_key(&missing, session.last_asked_key, &session.asked_keys)
        else {
            return questions::GENERIC_PROMPT.to_string();
        };
        session.record_asked(key);

        let context = session.fields.summarize();
        match self.oracle.natural_follow_up(&[key], &context).await {
            Ok(Some(question)) => question,
            _ => questions::question_for(key).to_string(),
        }
    }

    /// Best-effort clinician handoff. Spawned and forgotten: it may fail
    /// silently and never touches the confirmation reply.
    fn fire_handoff(&self, session: &Session) {
        let context = HandoffContext {
            history: session.history.clone(),
            fields: session.fields.clone(),
            risk: session.risk_assessment.clone(),
            attachments: session.attachments.clone(),
        };
        let _ = summary::spawn_handoff(self.oracle.clone(), context);
    }

    fn duplicate_at_boundary(&self, message_id: Option<&str>) -> bool {
        match message_id {
            Some(id) if self.dedup.processed(id) => {
                tracing::debug!(message_id = %id, "Duplicate message absorbed");
                true
            }
            _ => false,
        }
    }

    fn duplicate_in_session(session: &mut Session, message_id: Option<&str>) -> bool {
        let Some(id) = message_id else { return false };
        if session.last_message_id.as_deref() == Some(id) {
            tracing::debug!(message_id = %id, "Duplicate caught by session check");
            return true;
        }
        session.last_message_id = Some(id.to_string());
        false
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationSource, DocumentFindings, RiskAssessment};
    use crate::oracle::mock::MockOracle;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const HEADACHE: &str = "I've had a throbbing headache since this morning, worse in light";

    fn pipeline_with(oracle: MockOracle) -> (ConversationPipeline, Arc<MockOracle>) {
        let oracle = Arc::new(oracle);
        (ConversationPipeline::new(oracle.clone()), oracle)
    }

    async fn snapshot(pipeline: &ConversationPipeline, user: &str) -> Session {
        pipeline.sessions().get_or_create(user).lock().await.clone()
    }

    /// Walk a session to the confirmation stage via real turns.
    async fn walk_to_confirmation(pipeline: &ConversationPipeline, user: &str) {
        pipeline.handle_inbound_text(user, None, HEADACHE).await.unwrap();
        pipeline.handle_inbound_text(user, None, "Hubli").await.unwrap();
        pipeline.handle_inbound_text(user, None, "tele").await.unwrap();
        pipeline.handle_inbound_text(user, None, "Asha Rao").await.unwrap();
        pipeline.handle_inbound_text(user, None, "34").await.unwrap();
        pipeline.handle_inbound_text(user, None, "+91 99999 00000").await.unwrap();
        pipeline
            .handle_inbound_text(user, None, "asha@example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn emergency_short_circuits_with_zero_fields() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let reply = pipeline
            .handle_inbound_text("u1", None, "crushing chest pain and can't breathe")
            .await
            .unwrap();
        assert_eq!(reply, triage::EMERGENCY_ADVISORY);

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.fields.populated_count(), 0, "no extraction ran");
        let assessment = session.risk_assessment.unwrap();
        assert!(matches!(
            assessment.risk_band,
            RiskBand::Emergency | RiskBand::Urgent
        ));
    }

    #[tokio::test]
    async fn duplicate_id_produces_no_reply_and_no_mutation() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let first = pipeline
            .handle_inbound_text("u1", Some("wamid.1"), "hello")
            .await;
        assert!(first.is_some());

        let replay = pipeline
            .handle_inbound_text("u1", Some("wamid.1"), "hello")
            .await;
        assert!(replay.is_none());

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.turn_count, 1);
    }

    #[tokio::test]
    async fn heuristic_extraction_populates_fields_and_triggers_booking() {
        // Oracle fully unavailable: rule-based extraction yields >= 3
        // populated fields in one message, so classification fires and the
        // booking flow opens with the heuristic specialty (Neurology).
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let reply = pipeline.handle_inbound_text("u1", None, HEADACHE).await.unwrap();
        assert!(reply.contains("Neurology specialist"));
        assert!(reply.contains("city or region"));

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::BookingRegion);
        assert_eq!(session.fields.character.as_deref(), Some("throbbing"));
        assert_eq!(session.fields.onset.as_deref(), Some("this morning"));
        assert!(session
            .fields
            .aggrav_relieve
            .as_deref()
            .unwrap()
            .contains("worse with light"));
        let assessment = session.risk_assessment.unwrap();
        assert_eq!(assessment.source, ClassificationSource::Heuristic);
    }

    #[tokio::test]
    async fn vague_messages_hit_the_four_question_cap_then_classify() {
        let (pipeline, oracle) = pipeline_with(MockOracle::new());
        for i in 0..4 {
            pipeline
                .handle_inbound_text("u1", None, &format!("not sure {i}"))
                .await
                .unwrap();
            let session = snapshot(&pipeline, "u1").await;
            assert!(session.risk_assessment.is_none(), "still collecting");
            assert_eq!(session.asked_keys.len(), i + 1);
        }

        // Fifth turn: the cap forces classification even with zero fields.
        let reply = pipeline
            .handle_inbound_text("u1", None, "still not sure")
            .await
            .unwrap();
        let session = snapshot(&pipeline, "u1").await;
        assert!(session.risk_assessment.is_some());
        assert_eq!(oracle.classify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.stage, Stage::BookingRegion, "Routine verdict books");
        assert!(reply.contains("General Practice"));
        assert!(session.asked_keys.is_empty(), "pass reset on classification");
    }

    #[tokio::test]
    async fn questions_never_repeat_within_the_pass() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        for i in 0..4 {
            pipeline
                .handle_inbound_text("u1", None, &format!("hmm {i}"))
                .await
                .unwrap();
        }
        let session = snapshot(&pipeline, "u1").await;
        let mut keys = session.asked_keys.clone();
        keys.dedup();
        assert_eq!(keys.len(), 4, "four distinct keys asked");
    }

    #[tokio::test]
    async fn oracle_phrasing_is_preferred_for_follow_ups() {
        let (pipeline, _) = pipeline_with(MockOracle::new().with_follow_up("When did it begin?"));
        let reply = pipeline
            .handle_inbound_text("u1", None, "I don't feel well")
            .await
            .unwrap();
        assert_eq!(reply, "When did it begin?");

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.asked_keys.len(), 1, "key still recorded as asked");
    }

    #[tokio::test]
    async fn self_care_uses_oracle_freeform_when_available() {
        let oracle = MockOracle::new()
            .with_risk(RiskAssessment {
                risk_band: RiskBand::SelfCare,
                specialty: vec!["General Practice".into()],
                care_mode: None,
                rationale: "mild".into(),
                source: ClassificationSource::Oracle,
            })
            .with_freeform("Try rest and fluids for a couple of days.");
        let (pipeline, _) = pipeline_with(oracle);
        let reply = pipeline.handle_inbound_text("u1", None, HEADACHE).await.unwrap();
        assert_eq!(reply, "Try rest and fluids for a couple of days.");
    }

    #[tokio::test]
    async fn self_care_verdict_stays_in_intake_with_advice() {
        let oracle = MockOracle::new().with_risk(RiskAssessment {
            risk_band: RiskBand::SelfCare,
            specialty: vec!["General Practice".into()],
            care_mode: None,
            rationale: "mild".into(),
            source: ClassificationSource::Oracle,
        });
        let (pipeline, _) = pipeline_with(oracle);
        let reply = pipeline.handle_inbound_text("u1", None, HEADACHE).await.unwrap();
        assert_eq!(reply, SELF_CARE_FALLBACK, "freeform unavailable, fallback used");

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::Intake, "no booking for self-care");
    }

    #[tokio::test]
    async fn full_booking_flow_confirms_once_and_fires_handoff_once() {
        let (pipeline, oracle) = pipeline_with(MockOracle::new().with_handoff("handoff"));
        walk_to_confirmation(&pipeline, "u1").await;

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::BookingConfirmation);
        // Neurology + Hubli pins Dr. Meera Joshi in the summary.
        assert!(session.history.last().unwrap().text.contains("Dr. Meera Joshi"));

        let reply = pipeline.handle_inbound_text("u1", None, "Yes").await.unwrap();
        assert!(reply.contains("confirmed"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(oracle.handoff_calls.load(Ordering::SeqCst), 1);

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::Completed);
        assert!(session.booking_confirmed);

        // Completed is a closed ticket: no re-entry, no second handoff.
        let reply = pipeline.handle_inbound_text("u1", None, "yes").await.unwrap();
        assert_eq!(reply, CLOSED_TICKET_REPLY);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(oracle.handoff_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declining_confirmation_restarts_with_fresh_doctor_lookup() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        walk_to_confirmation(&pipeline, "u1").await;

        let reply = pipeline.handle_inbound_text("u1", None, "no").await.unwrap();
        assert!(reply.contains("start over"));

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::BookingRegion);
        assert_eq!(session.booking.specialty.as_deref(), Some("Neurology"));
        assert!(session.booking.doctor_name.is_none());

        // New region triggers a fresh lookup (Neurology + Belgaum).
        let reply = pipeline.handle_inbound_text("u1", None, "Belgaum").await.unwrap();
        assert!(reply.contains("Dr. Anil Patil"));
    }

    #[tokio::test]
    async fn interactive_booking_button_jumps_into_flow() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let reply = pipeline
            .handle_interactive_option("u1", Some("wamid.i1"), "book_tele")
            .await
            .unwrap();
        assert!(reply.contains("General Practice specialist"));

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::BookingRegion);
    }

    #[tokio::test]
    async fn booking_button_after_completion_is_a_closed_ticket() {
        let (pipeline, oracle) = pipeline_with(MockOracle::new().with_handoff("handoff"));
        walk_to_confirmation(&pipeline, "u1").await;
        pipeline.handle_inbound_text("u1", None, "yes").await.unwrap();

        let reply = pipeline
            .handle_interactive_option("u1", None, "book_tele")
            .await
            .unwrap();
        assert_eq!(reply, CLOSED_TICKET_REPLY);

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::Completed, "no transition out of terminal");
        assert!(session.booking.region.is_some(), "booking data untouched");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(oracle.handoff_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interactive_turns_are_recorded_in_the_session() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        pipeline
            .handle_interactive_option("u1", None, "book_tele")
            .await
            .unwrap();

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.turn_count, 1);
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].text, "book_tele");
        assert!(session.history[1].text.contains("city or region"));
    }

    #[tokio::test]
    async fn unknown_interactive_option_gets_generic_reply() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let reply = pipeline
            .handle_interactive_option("u1", None, "mystery_button")
            .await
            .unwrap();
        assert_eq!(reply, INTERACTIVE_FALLBACK);
    }

    #[tokio::test]
    async fn document_analysis_appends_attachment_and_replies() {
        let oracle = MockOracle::new().with_findings(DocumentFindings {
            mime_type: "application/pdf".into(),
            findings: serde_json::json!({ "hemoglobin": "11.2 g/dL" }),
        });
        let (pipeline, _) = pipeline_with(oracle);
        let reply = pipeline
            .handle_document("u1", Some("wamid.d1"), "aGVsbG8=", "application/pdf")
            .await
            .unwrap();
        assert!(reply.starts_with("I analyzed the report. Key points:"));
        assert!(reply.contains("hemoglobin"));

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.attachments.len(), 1);
    }

    #[tokio::test]
    async fn document_analysis_failure_is_a_silent_skip() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        let reply = pipeline
            .handle_document("u1", None, "aGVsbG8=", "application/pdf")
            .await;
        assert!(reply.is_none());

        let session = snapshot(&pipeline, "u1").await;
        assert!(session.attachments.is_empty(), "no mutation on failure");
    }

    #[tokio::test]
    async fn emergency_scan_runs_even_mid_booking() {
        let (pipeline, _) = pipeline_with(MockOracle::new());
        walk_to_confirmation(&pipeline, "u1").await;

        let reply = pipeline
            .handle_inbound_text("u1", None, "suddenly crushing chest pain")
            .await
            .unwrap();
        assert_eq!(reply, triage::EMERGENCY_ADVISORY);

        let session = snapshot(&pipeline, "u1").await;
        assert_eq!(session.stage, Stage::BookingConfirmation, "stage untouched");
    }

    #[tokio::test]
    async fn oracle_extraction_takes_precedence_over_rules() {
        let oracle = MockOracle::new().with_extract(super::super::oldcarts::OldcartsFields {
            onset: Some("two days ago".into()),
            ..Default::default()
        });
        let (pipeline, _) = pipeline_with(oracle);
        pipeline
            .handle_inbound_text("u1", None, "headache since this morning")
            .await
            .unwrap();

        let session = snapshot(&pipeline, "u1").await;
        // Oracle said "two days ago"; the rule-based "this morning" never ran.
        assert_eq!(session.fields.onset.as_deref(), Some("two days ago"));
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
