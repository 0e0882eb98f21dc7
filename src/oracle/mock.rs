//! Canned-response oracle for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Oracle, OracleError};
use crate::models::{ChatEntry, DocumentFindings, RiskAssessment};
use crate::pipeline::oldcarts::{FieldKey, OldcartsFields};

/// Mock oracle. Unset slots behave like an unavailable oracle (error),
/// so the default `MockOracle::new()` exercises every fallback path.
#[derive(Default)]
pub struct MockOracle {
    extract: Option<OldcartsFields>,
    follow_up: Option<String>,
    risk: Option<RiskAssessment>,
    freeform: Option<String>,
    findings: Option<DocumentFindings>,
    handoff: Option<String>,
    pub classify_calls: AtomicUsize,
    pub handoff_calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extract(mut self, fields: OldcartsFields) -> Self {
        self.extract = Some(fields);
        self
    }

    pub fn with_follow_up(mut self, text: &str) -> Self {
        self.follow_up = Some(text.to_string());
        self
    }

    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn with_freeform(mut self, text: &str) -> Self {
        self.freeform = Some(text.to_string());
        self
    }

    pub fn with_findings(mut self, findings: DocumentFindings) -> Self {
        self.findings = Some(findings);
        self
    }

    pub fn with_handoff(mut self, text: &str) -> Self {
        self.handoff = Some(text.to_string());
        self
    }

    fn canned<T: Clone>(slot: &Option<T>) -> Result<Option<T>, OracleError> {
        match slot {
            Some(value) => Ok(Some(value.clone())),
            None => Err(OracleError::NotConfigured),
        }
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn structured_extract(
        &self,
        _narrative: &str,
        _existing: &OldcartsFields,
    ) -> Result<Option<OldcartsFields>, OracleError> {
        Self::canned(&self.extract)
    }

    async fn natural_follow_up(
        &self,
        _missing: &[FieldKey],
        _context: &str,
    ) -> Result<Option<String>, OracleError> {
        Self::canned(&self.follow_up)
    }

    async fn risk_classify(
        &self,
        _fields: &OldcartsFields,
        _narrative: &str,
    ) -> Result<Option<RiskAssessment>, OracleError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Self::canned(&self.risk)
    }

    async fn freeform_turn(
        &self,
        _history: &[ChatEntry],
        _text: &str,
    ) -> Result<Option<String>, OracleError> {
        Self::canned(&self.freeform)
    }

    async fn document_analyze(
        &self,
        _base64_data: &str,
        _mime_type: &str,
    ) -> Result<Option<DocumentFindings>, OracleError> {
        Self::canned(&self.findings)
    }

    async fn handoff_summary(
        &self,
        _history: &[ChatEntry],
        _risk: Option<&RiskAssessment>,
        _attachments: &[DocumentFindings],
    ) -> Result<Option<String>, OracleError> {
        self.handoff_calls.fetch_add(1, Ordering::SeqCst);
        Self::canned(&self.handoff)
    }
}
