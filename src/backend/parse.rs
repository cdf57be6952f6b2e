//! Backend stdout → `AnalysisResponse`.
//!
//! Pure parsing, kept apart from process handling for testability.
//!
//! Order of attempts:
//! 1. the whole output as a JSON analysis object
//! 2. a CLI result envelope (`{"type":"result","result":"..."}`) whose
//!    `result` text is parsed again, unless the envelope flags an error
//! 3. the outermost `{...}` span, for JSON wrapped in prose or a code fence
//! 4. the raw text as free-form analysis, recommendation `HOLD`
//!
//! Empty output and error envelopes are errors; malformed output still
//! carries useful text.

use serde::Deserialize;
use serde_json::Value;

use super::types::{AnalysisResponse, BackendError, Recommendation};

#[derive(Deserialize)]
struct WireAnalysis {
    analysis: Option<String>,
    confidence: Option<Value>,
    recommendation: Option<String>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct ResultEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    subtype: Option<String>,
    is_error: Option<bool>,
    result: String,
}

impl ResultEnvelope {
    fn is_failure(&self) -> bool {
        self.is_error == Some(true) || self.subtype.as_deref().is_some_and(|s| s.starts_with("error"))
    }
}

/// Parse backend stdout.
///
/// # Errors
///
/// Returns [`BackendError::Parse`] when the output is empty, and
/// [`BackendError::Reported`] when the tool's result envelope flags an error.
pub fn parse_output(stdout: &str) -> Result<AnalysisResponse, BackendError> {
    let text = stdout.trim();
    if text.is_empty() {
        return Err(BackendError::Parse("backend produced no output".into()));
    }

    if let Some(parsed) = parse_structured(text) {
        return Ok(parsed);
    }

    if let Some(inner) = unwrap_envelope(text)? {
        return parse_output(&inner);
    }

    Ok(AnalysisResponse {
        success: true,
        analysis: Some(text.to_string()),
        recommendation: Some(Recommendation::Hold),
        ..AnalysisResponse::default()
    })
}

fn parse_structured(text: &str) -> Option<AnalysisResponse> {
    if let Some(parsed) = parse_object(text) {
        return Some(parsed);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start == 0 && end == text.len() - 1 {
        return None;
    }
    (start < end).then(|| parse_object(&text[start..=end])).flatten()
}

fn parse_object(text: &str) -> Option<AnalysisResponse> {
    let wire: WireAnalysis = serde_json::from_str(text).ok()?;
    let analysis = wire.analysis.filter(|a| !a.trim().is_empty())?;
    Some(AnalysisResponse {
        success: true,
        analysis: Some(analysis),
        confidence: wire.confidence.as_ref().and_then(confidence_value),
        recommendation: Some(
            wire.recommendation
                .as_deref()
                .map_or(Recommendation::Hold, Recommendation::parse_lenient),
        ),
        reasoning: wire.reasoning.filter(|r| !r.trim().is_empty()),
        ..AnalysisResponse::default()
    })
}

fn unwrap_envelope(text: &str) -> Result<Option<String>, BackendError> {
    let Ok(envelope) = serde_json::from_str::<ResultEnvelope>(text) else {
        return Ok(None);
    };
    if envelope.kind.as_deref().is_some_and(|k| k != "result") {
        return Ok(None);
    }
    let inner = envelope.result.trim();
    if envelope.is_failure() {
        let detail = match (envelope.subtype.as_deref(), inner.is_empty()) {
            (Some(subtype), true) => subtype.to_string(),
            (Some(subtype), false) => format!("{inner} ({subtype})"),
            (None, true) => "error result without detail".to_string(),
            (None, false) => inner.to_string(),
        };
        return Err(BackendError::Reported(detail));
    }
    Ok((!inner.is_empty() && inner != text).then(|| inner.to_string()))
}

/// Numbers or numeric strings, clamped into `0..=100`.
fn confidence_value(raw: &Value) -> Option<f64> {
    let n = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then(|| n.clamp(0.0, 100.0))
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
