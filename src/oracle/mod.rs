//! The generative-text oracle interface.
//!
//! The oracle is a black-box, fallible external service: every method may
//! fail or return `None`, and callers must treat both as "use the fallback".
//! No oracle failure is ever surfaced to the patient.

pub mod gemini;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChatEntry, DocumentFindings, RiskAssessment};
use crate::pipeline::oldcarts::{FieldKey, OldcartsFields};

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle is not configured (no API key)")]
    NotConfigured,

    #[error("Oracle HTTP request failed: {0}")]
    Http(String),

    #[error("Oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Oracle response was malformed: {0}")]
    MalformedResponse(String),
}

/// External generative-text service, consumed behind a trait so the
/// pipeline can be tested against a mock.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Extract OLDCARTS fields from a narrative. Partial output is fine;
    /// `None` means the model produced nothing parseable.
    async fn structured_extract(
        &self,
        narrative: &str,
        existing: &OldcartsFields,
    ) -> Result<Option<OldcartsFields>, OracleError>;

    /// Phrase a natural follow-up question for the missing fields.
    async fn natural_follow_up(
        &self,
        missing: &[FieldKey],
        context: &str,
    ) -> Result<Option<String>, OracleError>;

    /// Full triage verdict over fields + latest narrative.
    async fn risk_classify(
        &self,
        fields: &OldcartsFields,
        narrative: &str,
    ) -> Result<Option<RiskAssessment>, OracleError>;

    /// Free conversational turn over the chat history.
    async fn freeform_turn(
        &self,
        history: &[ChatEntry],
        text: &str,
    ) -> Result<Option<String>, OracleError>;

    /// Analyze an attached document/image (base64 payload).
    async fn document_analyze(
        &self,
        base64_data: &str,
        mime_type: &str,
    ) -> Result<Option<DocumentFindings>, OracleError>;

    /// Clinician handoff summary. Best-effort: callers never block a
    /// user-visible reply on this.
    async fn handoff_summary(
        &self,
        history: &[ChatEntry],
        risk: Option<&RiskAssessment>,
        attachments: &[DocumentFindings],
    ) -> Result<Option<String>, OracleError>;
}
