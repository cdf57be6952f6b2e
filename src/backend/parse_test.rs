use super::*;

#[test]
fn parse_json_object() {
    let out = r#"{"analysis":"Solid fundamentals","confidence":82,"recommendation":"BUY","reasoning":"Low debt"}"#;
    let resp = parse_output(out).unwrap();
    assert!(resp.success);
    assert_eq!(resp.analysis.as_deref(), Some("Solid fundamentals"));
    assert_eq!(resp.confidence, Some(82.0));
    assert_eq!(resp.recommendation, Some(Recommendation::Buy));
    assert_eq!(resp.reasoning.as_deref(), Some("Low debt"));
    assert!(resp.error.is_none());
}

#[test]
fn plain_text_falls_back_to_hold() {
    let resp = parse_output("Strong buy signal\n").unwrap();
    assert!(resp.success);
    assert_eq!(resp.analysis.as_deref(), Some("Strong buy signal"));
    assert_eq!(resp.recommendation, Some(Recommendation::Hold));
    assert_eq!(resp.confidence, None);
    assert_eq!(resp.reasoning, None);
}

#[test]
fn json_inside_code_fence() {
    let out = "Here you go:\n```json\n{\"analysis\":\"Overvalued\",\"recommendation\":\"sell\"}\n```\n";
    let resp = parse_output(out).unwrap();
    assert_eq!(resp.analysis.as_deref(), Some("Overvalued"));
    assert_eq!(resp.recommendation, Some(Recommendation::Sell));
}

#[test]
fn cli_result_envelope_is_unwrapped() {
    let inner = r#"{"analysis":"Hold steady","confidence":"55%","recommendation":"HOLD"}"#;
    let out = serde_json::json!({ "type": "result", "subtype": "success", "result": inner }).to_string();
    let resp = parse_output(&out).unwrap();
    assert_eq!(resp.analysis.as_deref(), Some("Hold steady"));
    assert_eq!(resp.confidence, Some(55.0));
}

#[test]
fn cli_result_envelope_with_plain_text() {
    let out = serde_json::json!({ "type": "result", "result": "Trim the position" }).to_string();
    let resp = parse_output(&out).unwrap();
    assert_eq!(resp.analysis.as_deref(), Some("Trim the position"));
    assert_eq!(resp.recommendation, Some(Recommendation::Hold));
}

#[test]
fn error_envelope_is_a_backend_error() {
    let out = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"result":"Credit balance is too low"}"#;
    let err = parse_output(out).unwrap_err();
    assert!(matches!(&err, BackendError::Reported(detail) if detail == "Credit balance is too low (error_max_turns)"));
}

#[test]
fn error_flag_alone_marks_failure() {
    let out = serde_json::json!({ "type": "result", "is_error": true, "result": "API Error: Connection error." }).to_string();
    let err = parse_output(&out).unwrap_err();
    assert!(matches!(&err, BackendError::Reported(detail) if detail == "API Error: Connection error."));
    assert!(crate::error::ErrorCode::retryable(&err));
}

#[test]
fn error_subtype_without_result_text() {
    let out = r#"{"type":"result","subtype":"error_during_execution","result":""}"#;
    let err = parse_output(out).unwrap_err();
    assert!(matches!(&err, BackendError::Reported(detail) if detail == "error_during_execution"));
}

#[test]
fn success_envelope_with_false_error_flag_is_unwrapped() {
    let out = serde_json::json!({ "type": "result", "subtype": "success", "is_error": false, "result": "Accumulate" }).to_string();
    let resp = parse_output(&out).unwrap();
    assert!(resp.success);
    assert_eq!(resp.analysis.as_deref(), Some("Accumulate"));
}

#[test]
fn json_without_analysis_is_treated_as_text() {
    let out = r#"{"recommendation":"BUY"}"#;
    let resp = parse_output(out).unwrap();
    assert_eq!(resp.analysis.as_deref(), Some(out));
    assert_eq!(resp.recommendation, Some(Recommendation::Hold));
}

#[test]
fn unknown_recommendation_and_out_of_range_confidence() {
    let out = r#"{"analysis":"Mixed","confidence":140,"recommendation":"ACCUMULATE"}"#;
    let resp = parse_output(out).unwrap();
    assert_eq!(resp.recommendation, Some(Recommendation::Hold));
    assert_eq!(resp.confidence, Some(100.0));
}

#[test]
fn non_numeric_confidence_is_dropped() {
    let out = r#"{"analysis":"Mixed","confidence":"high"}"#;
    let resp = parse_output(out).unwrap();
    assert_eq!(resp.confidence, None);
}

#[test]
fn empty_output_is_parse_error() {
    let err = parse_output("  \n\t").unwrap_err();
    assert!(matches!(err, BackendError::Parse(_)));
}

#[test]
fn truncated_json_falls_back_to_text() {
    let out = r#"{"analysis":"cut off"#;
    let resp = parse_output(out).unwrap();
    assert_eq!(resp.analysis.as_deref(), Some(out));
}
