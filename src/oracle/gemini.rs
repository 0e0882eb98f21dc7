//! Gemini-backed oracle implementation over the generative-language REST API.
//!
//! Every public failure mode maps to `OracleError` or `Ok(None)`; the
//! pipeline treats both as "fall back". Malformed JSON from the model is
//! discarded as `None`, never propagated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Oracle, OracleError};
use crate::config::Config;
use crate::models::{
    ChatEntry, ChatRole, ClassificationSource, DocumentFindings, RiskAssessment, RiskBand,
};
use crate::pipeline::oldcarts::{FieldKey, OldcartsFields};

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct GeminiClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.oracle_api_key.clone(),
            &config.oracle_base_url,
            &config.oracle_model,
        )
    }

    async fn generate(
        &self,
        system: &str,
        parts: Vec<Part>,
        json_mode: bool,
    ) -> Result<Option<String>, OracleError> {
        let key = self.api_key.as_ref().ok_or(OracleError::NotConfigured)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, key
        );

        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part::text(system)],
            },
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: json_mode.then(|| GenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Http(format!("request timed out after {REQUEST_TIMEOUT_SECS}s"))
                } else {
                    OracleError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

        Ok(parsed.first_text())
    }

    async fn text_prompt(&self, system: &str, user: &str) -> Result<Option<String>, OracleError> {
        let text = self.generate(system, vec![Part::text(user)], false).await?;
        Ok(text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }

    /// JSON-mode prompt. Model output that fails to parse is discarded as
    /// `None` so the caller falls back.
    async fn json_prompt(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Option<serde_json::Value>, OracleError> {
        let Some(text) = self.generate(system, vec![Part::text(user)], true).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding non-parseable oracle JSON");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Oracle for GeminiClient {
    async fn structured_extract(
        &self,
        narrative: &str,
        existing: &OldcartsFields,
    ) -> Result<Option<OldcartsFields>, OracleError> {
        let system = "Extract OLDCARTS (Onset, Location, Duration, Character, \
            Aggravating/Relieving, Related, Severity/Impact) as JSON with keys onset, location, \
            duration, character, aggrav_relieve, related (array), severity_impact. \
            Use null for unknown.";
        let user = format!(
            "Patient narrative: {narrative}\nAlready known: {}",
            existing.summarize()
        );
        let Some(value) = self.json_prompt(system, &user).await? else {
            return Ok(None);
        };
        Ok(parse_extracted_fields(value))
    }

    async fn natural_follow_up(
        &self,
        missing: &[FieldKey],
        context: &str,
    ) -> Result<Option<String>, OracleError> {
        let system = "You are a clinician. Ask ONE short, natural follow-up question focusing \
            ONLY on the missing clinical-history fields provided. Avoid lists.";
        let keys: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
        let user = format!("Missing: {}\nContext: {context}", keys.join(", "));
        self.text_prompt(system, &user).await
    }

    async fn risk_classify(
        &self,
        fields: &OldcartsFields,
        narrative: &str,
    ) -> Result<Option<RiskAssessment>, OracleError> {
        let system = "Given OLDCARTS + narrative, return JSON with risk_band \
            (Emergency|Urgent|Soon|Routine|Self-care), specialty array, optional care_mode, \
            and brief rationale.";
        let user = format!("OLDCARTS: {}\nNarrative: {narrative}", fields.summarize());
        let Some(value) = self.json_prompt(system, &user).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<RiskVerdictWire>(value) {
            Ok(wire) => Ok(Some(wire.into_assessment())),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed triage verdict");
                Ok(None)
            }
        }
    }

    async fn freeform_turn(
        &self,
        history: &[ChatEntry],
        text: &str,
    ) -> Result<Option<String>, OracleError> {
        let system = "You are a warm, careful clinical intake assistant. Respond briefly and \
            empathetically. Never diagnose; advise seeing a doctor when in doubt.";
        let transcript: Vec<String> = history
            .iter()
            .map(|e| {
                let who = match e.role {
                    ChatRole::Patient => "Patient",
                    ChatRole::Clinician => "Assistant",
                };
                format!("{who}: {}", e.text)
            })
            .collect();
        let user = format!("{}\nPatient: {text}", transcript.join("\n"));
        self.text_prompt(system, &user).await
    }

    async fn document_analyze(
        &self,
        base64_data: &str,
        mime_type: &str,
    ) -> Result<Option<DocumentFindings>, OracleError> {
        let parts = vec![
            Part::text(
                "Extract key findings and entities suitable for a clinician from this report \
                 or image as JSON.",
            ),
            Part::inline(mime_type, base64_data),
        ];
        let Some(text) = self
            .generate("You are a clinical document analyst.", parts, false)
            .await?
        else {
            return Ok(None);
        };
        // Structured JSON when the model produced it; a summary wrapper otherwise.
        let findings = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::json!({ "summary": text }));
        Ok(Some(DocumentFindings {
            mime_type: mime_type.to_string(),
            findings,
        }))
    }

    async fn handoff_summary(
        &self,
        history: &[ChatEntry],
        risk: Option<&RiskAssessment>,
        attachments: &[DocumentFindings],
    ) -> Result<Option<String>, OracleError> {
        let system = "Write a concise clinician handoff: chief complaint, history highlights, \
            risk level, recommended specialty, and attached findings. Plain prose.";
        let transcript: Vec<String> = history
            .iter()
            .map(|e| {
                format!(
                    "{}: {}",
                    match e.role {
                        ChatRole::Patient => "Patient",
                        ChatRole::Clinician => "Assistant",
                    },
                    e.text
                )
            })
            .collect();
        let risk_line = risk
            .map(|r| format!("{} / {}", r.risk_band.as_str(), r.specialty.join(", ")))
            .unwrap_or_else(|| "unassessed".to_string());
        let user = format!(
            "Conversation:\n{}\n\nRisk: {risk_line}\nAttachments: {}",
            transcript.join("\n"),
            attachments.len()
        );
        self.text_prompt(system, &user).await
    }
}

/// Accept both a flat field map and one nested under an `oldcarts` key;
/// unknown keys are dropped by the target struct either way.
fn parse_extracted_fields(value: serde_json::Value) -> Option<OldcartsFields> {
    let inner = match value {
        serde_json::Value::Object(ref map) if map.contains_key("oldcarts") => {
            map.get("oldcarts").cloned().unwrap_or_default()
        }
        other => other,
    };
    match serde_json::from_value::<OldcartsFields>(inner) {
        Ok(fields) => Some(fields),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding malformed extraction output");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline(mime_type: &str, data: &str) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            }),
        }
    }
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content
            .parts
            .into_iter()
            .find_map(|p| p.text)
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Oracle-side triage verdict, before the source marker is attached.
#[derive(Deserialize)]
struct RiskVerdictWire {
    risk_band: RiskBand,
    #[serde(default)]
    specialty: Vec<String>,
    #[serde(default)]
    care_mode: Option<String>,
    #[serde(default)]
    rationale: String,
}

impl RiskVerdictWire {
    fn into_assessment(self) -> RiskAssessment {
        RiskAssessment {
            risk_band: self.risk_band,
            specialty: self.specialty,
            care_mode: self.care_mode,
            rationale: self.rationale,
            source: ClassificationSource::Oracle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_errors_without_network() {
        let client = GeminiClient::new(None, "https://example.invalid", "test-model");
        let result = client
            .structured_extract("headache", &OldcartsFields::default())
            .await;
        assert!(matches!(result, Err(OracleError::NotConfigured)));
    }

    #[test]
    fn extraction_accepts_flat_and_nested_shapes() {
        let flat = serde_json::json!({ "onset": "this morning", "character": "throbbing" });
        let fields = parse_extracted_fields(flat).unwrap();
        assert_eq!(fields.onset.as_deref(), Some("this morning"));

        let nested = serde_json::json!({ "oldcarts": { "location": "chest" } });
        let fields = parse_extracted_fields(nested).unwrap();
        assert_eq!(fields.location.as_deref(), Some("chest"));
    }

    #[test]
    fn extraction_rejects_non_object_output() {
        assert!(parse_extracted_fields(serde_json::json!([1, 2, 3])).is_none());
    }

    #[test]
    fn verdict_wire_parses_and_marks_oracle_source() {
        let wire: RiskVerdictWire = serde_json::from_value(serde_json::json!({
            "risk_band": "Self-care",
            "specialty": ["General Practice"],
            "rationale": "mild symptoms"
        }))
        .unwrap();
        let assessment = wire.into_assessment();
        assert_eq!(assessment.risk_band, RiskBand::SelfCare);
        assert_eq!(assessment.source, ClassificationSource::Oracle);
    }

    #[test]
    fn malformed_verdict_fails_parse() {
        let result = serde_json::from_value::<RiskVerdictWire>(serde_json::json!({
            "risk_band": "Catastrophic"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn response_extracts_first_candidate_text() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "hello" } ] } }
            ]
        }))
        .unwrap();
        assert_eq!(response.first_text().as_deref(), Some("hello"));
    }

    #[test]
    fn empty_response_yields_none() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(response.first_text().is_none());
    }
}
