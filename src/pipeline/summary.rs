//! Clinician handoff summary, generated after a confirmed booking.
//!
//! Contract: best-effort background work. It may fail silently and must
//! never block or alter the confirmation reply already computed.

use std::sync::Arc;

use crate::models::{ChatEntry, DocumentFindings, RiskAssessment};
use crate::oracle::Oracle;

use super::oldcarts::OldcartsFields;

/// Snapshot of everything the summary needs, cloned out of the session so
/// the background task holds no lock.
#[derive(Debug, Clone)]
pub struct HandoffContext {
    pub history: Vec<ChatEntry>,
    pub fields: OldcartsFields,
    pub risk: Option<RiskAssessment>,
    pub attachments: Vec<DocumentFindings>,
}

/// Deterministic narrative built from the structured history. Used as the
/// summary body whenever the oracle yields nothing.
pub fn build_narrative(context: &HandoffContext) -> String {
    let mut parts = Vec::new();
    let fields = &context.fields;
    if let Some(v) = &fields.onset {
        parts.push(format!("Onset {v}"));
    }
    if let Some(v) = &fields.location {
        parts.push(format!("at {v}"));
    }
    if let Some(v) = &fields.character {
        parts.push(v.clone());
    }
    if let Some(v) = &fields.duration {
        parts.push(format!("duration {v}"));
    }
    if let Some(v) = &fields.aggrav_relieve {
        parts.push(format!("triggers/relief: {v}"));
    }
    if !fields.related.is_empty() {
        parts.push(format!("associated: {}", fields.related.join(", ")));
    }
    if let Some(v) = &fields.severity_impact {
        parts.push(format!("impact: {v}"));
    }

    let mut summary = parts.join("; ");
    if let Some(risk) = &context.risk {
        summary.push_str(&format!(
            " [risk: {} → {}]",
            risk.risk_band.as_str(),
            risk.specialty.join(", ")
        ));
    }
    if !context.attachments.is_empty() {
        summary.push_str(&format!(" [{} attachment(s)]", context.attachments.len()));
    }
    summary
}

/// Generate the handoff text: oracle first, narrative builder as fallback.
pub async fn generate_handoff(oracle: &dyn Oracle, context: &HandoffContext) -> String {
    match oracle
        .handoff_summary(&context.history, context.risk.as_ref(), &context.attachments)
        .await
    {
        Ok(Some(text)) => text,
        Ok(None) => build_narrative(context),
        Err(e) => {
            tracing::warn!(error = %e, "Handoff summary generation failed, using narrative");
            build_narrative(context)
        }
    }
}

/// Fire-and-forget the handoff generation. The returned handle is only
/// awaited by tests; production callers drop it.
pub fn spawn_handoff(
    oracle: Arc<dyn Oracle>,
    context: HandoffContext,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let summary = generate_handoff(oracle.as_ref(), &context).await;
        tracing::info!(summary = %summary, "Clinician handoff summary ready");
    })
}
