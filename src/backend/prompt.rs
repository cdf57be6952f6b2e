//! Prompt composition for the analysis tool.
//!
//! The composed prompt is delivered on stdin, so it can be arbitrarily long
//! without hitting argv limits. The trailing format block asks for the JSON
//! shape `parse::parse_output` understands first.

use std::fmt::Write;

use super::types::AnalysisRequest;

const INSTRUCTIONS: &str = "You are a financial analysis assistant for a personal investment portfolio.\n\
     Answer the request below with a concise, factual analysis.\n\
     Do not invent prices or figures that are not present in the provided data.\n";

const RESPONSE_FORMAT: &str = "Respond with a single JSON object and nothing else:\n\
     {\"analysis\": string, \"confidence\": number 0-100, \
     \"recommendation\": \"BUY\" | \"SELL\" | \"HOLD\", \"reasoning\": string}\n";

/// Build the full prompt for one request.
#[must_use]
pub fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::from(INSTRUCTIONS);

    if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
        let _ = write!(prompt, "\nContext:\n{}\n", context.trim());
    }

    if let Some(code) = request.instrument_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(prompt, "\nInstrument: {}", code.trim());
    }

    if let Some(data) = &request.market_data {
        let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        let _ = write!(prompt, "\nMarket data:\n{rendered}\n");
    }

    let _ = write!(prompt, "\nRequest:\n{}\n\n{RESPONSE_FORMAT}", request.prompt.trim());
    prompt
}
