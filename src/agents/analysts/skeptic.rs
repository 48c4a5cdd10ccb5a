//! Skeptic: source credibility, bias, and clickbait critique.

use crate::agents::build_trace;
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{AgentTrace, SkepticReport};
use serde_json::Value;
use std::time::Instant;

const AGENT_NAME: &str = "Skeptic";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1200;
const MAX_CONTENT_CHARS: usize = 3000;

const SYSTEM_PROMPT: &str = "\
You are a rigorous news skeptic. Evaluate source credibility, detect bias and clickbait, and flag \
logical gaps — but only point out problems you can back with evidence from the text. Return JSON: \
{\"credibility_tier\": \"mainstream|state-media|trade-press|community|unknown\", \
\"bias_indicators\": [...], \"red_flags\": [...], \"verification_suggestions\": [...]}.";

pub struct Skeptic {
    gateway: LlmGateway,
}

impl Skeptic {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    pub async fn process(&self, title: &str, source: &str, content: &str) -> (SkepticReport, AgentTrace) {
        let started = Instant::now();
        let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        let user_prompt = format!("Title: {title}\nSource: {source}\nContent: {truncated}");
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let report = parse_report(&parsed);
                let trace = build_trace(AGENT_NAME, title, &report.credibility_tier, started, usage.prompt_tokens, usage.completion_tokens, None);
                (report, trace)
            }
            Ok((None, usage)) => {
                let trace = build_trace(AGENT_NAME, title, "no parseable JSON", started, usage.prompt_tokens, usage.completion_tokens, None);
                (fallback_report(), trace)
            }
            Err(err) => {
                // Gateway already logs `llm_call_failed`; this degrades to a
                // neutral report rather than skipping the article, so it gets
                // no `article_analysis_failed` of its own.
                let trace = build_trace(AGENT_NAME, title, "", started, 0, 0, Some(err.to_string()));
                (fallback_report(), trace)
            }
        }
    }
}

fn parse_report(parsed: &Value) -> SkepticReport {
    SkepticReport {
        credibility_tier: parsed.get("credibility_tier").and_then(Value::as_str).unwrap_or("unknown").to_string(),
        bias_indicators: string_array(parsed, "bias_indicators"),
        red_flags: string_array(parsed, "red_flags"),
        verification_suggestions: string_array(parsed, "verification_suggestions"),
    }
}

fn fallback_report() -> SkepticReport {
    SkepticReport {
        credibility_tier: "unknown".to_string(),
        bias_indicators: Vec::new(),
        red_flags: Vec::new(),
        verification_suggestions: Vec::new(),
    }
}

fn string_array(parsed: &Value, key: &str) -> Vec<String> {
    parsed
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_report_reads_fields() {
        let parsed = json!({
            "credibility_tier": "trade-press",
            "bias_indicators": ["loaded headline"],
            "red_flags": [],
            "verification_suggestions": ["check primary filing"],
        });
        let report = parse_report(&parsed);
        assert_eq!(report.credibility_tier, "trade-press");
        assert_eq!(report.bias_indicators, vec!["loaded headline".to_string()]);
    }

    #[test]
    fn test_fallback_report_is_neutral() {
        let report = fallback_report();
        assert_eq!(report.credibility_tier, "unknown");
        assert!(report.red_flags.is_empty());
    }
}
