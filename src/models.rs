//! Shared domain types: chat history entries, conversation stages,
//! risk bands, and booking data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Chat history
// ═══════════════════════════════════════════════════════════

/// Who produced a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Patient,
    Clinician,
}

/// One turn of the conversation, kept in the session's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn patient(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Patient,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn clinician(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Clinician,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Conversation stage
// ═══════════════════════════════════════════════════════════

/// Discrete state of a user's conversation. Exactly one value is active.
/// `Completed` is terminal: a further message is treated as a closed ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    BookingRegion,
    BookingConsultationType,
    BookingPatientDetails,
    BookingConfirmation,
    Completed,
}

impl Stage {
    /// Once in a booking sub-stage, clinical-field collection is frozen.
    pub fn is_booking(self) -> bool {
        matches!(
            self,
            Stage::BookingRegion
                | Stage::BookingConsultationType
                | Stage::BookingPatientDetails
                | Stage::BookingConfirmation
        )
    }
}

// ═══════════════════════════════════════════════════════════
// Risk assessment
// ═══════════════════════════════════════════════════════════

/// Urgency band of a triage verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    Emergency,
    Urgent,
    Soon,
    Routine,
    #[serde(rename = "Self-care", alias = "SelfCare", alias = "Self-Care")]
    SelfCare,
}

impl RiskBand {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskBand::Emergency => "Emergency",
            RiskBand::Urgent => "Urgent",
            RiskBand::Soon => "Soon",
            RiskBand::Routine => "Routine",
            RiskBand::SelfCare => "Self-care",
        }
    }
}

/// Which path produced a classification: the oracle, or the deterministic
/// safety net after the oracle failed or returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationSource {
    Oracle,
    Heuristic,
}

/// Structured triage verdict kept on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_band: RiskBand,
    pub specialty: Vec<String>,
    pub care_mode: Option<String>,
    pub rationale: String,
    pub source: ClassificationSource,
}

impl RiskAssessment {
    /// The specialty to route booking to. Defaults to General Practice.
    pub fn primary_specialty(&self) -> &str {
        self.specialty
            .first()
            .map(String::as_str)
            .unwrap_or("General Practice")
    }
}

// ═══════════════════════════════════════════════════════════
// Booking
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsultationType {
    Teleconsultation,
    InPerson,
}

impl ConsultationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsultationType::Teleconsultation => "teleconsultation",
            ConsultationType::InPerson => "in-person",
        }
    }
}

/// Patient contact details, collected one per turn in strict order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientDetails {
    pub name: Option<String>,
    pub age: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Appointment-booking state. `specialty` survives a confirmation decline;
/// everything else is cleared on reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingData {
    pub region: Option<String>,
    pub specialty: Option<String>,
    pub doctor_name: Option<String>,
    pub consultation_type: Option<ConsultationType>,
    pub patient: PatientDetails,
}

impl BookingData {
    /// Clear everything except the resolved specialty (confirmation-decline
    /// reset path).
    pub fn reset_keeping_specialty(&mut self) {
        let specialty = self.specialty.take();
        *self = BookingData {
            specialty,
            ..BookingData::default()
        };
    }
}

// ═══════════════════════════════════════════════════════════
// Document analysis
// ═══════════════════════════════════════════════════════════

/// Structured findings from the document/image analysis path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFindings {
    pub mime_type: String,
    pub findings: serde_json::Value,
}
