//! Economist: first/second/third-order economic impact and market
//! sentiment, "butterfly effect" style.

use crate::agents::build_trace;
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{AgentTrace, EconomistReport};
use serde_json::Value;
use std::time::Instant;

const AGENT_NAME: &str = "Economist";
const TEMPERATURE: f32 = 0.4;
const MAX_TOKENS: u32 = 1500;
const MAX_CONTENT_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "\
You are a macro economist tracing first-, second-, and third-order effects of a news event, the way \
a butterfly-effect analysis would. Assess market sentiment and the sectors it touches. Return JSON: \
{\"first_order_impact\": \"...\", \"second_order_impact\": \"...\", \"third_order_impact\": \"...\", \
\"market_sentiment\": \"bullish|bearish|neutral\", \"affected_sectors\": [...]}.";

pub struct Economist {
    gateway: LlmGateway,
}

impl Economist {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    pub async fn process(&self, title: &str, summary: &str) -> (EconomistReport, AgentTrace) {
        let started = Instant::now();
        let truncated: String = summary.chars().take(MAX_CONTENT_CHARS).collect();
        let user_prompt = format!("Title: {title}\nSummary: {truncated}");
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let report = parse_report(&parsed);
                let trace = build_trace(AGENT_NAME, title, &report.market_sentiment, started, usage.prompt_tokens, usage.completion_tokens, None);
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

fn parse_report(parsed: &Value) -> EconomistReport {
    EconomistReport {
        first_order_impact: parsed.get("first_order_impact").and_then(Value::as_str).unwrap_or("").to_string(),
        second_order_impact: parsed.get("second_order_impact").and_then(Value::as_str).unwrap_or("").to_string(),
        third_order_impact: parsed.get("third_order_impact").and_then(Value::as_str).unwrap_or("").to_string(),
        market_sentiment: parsed.get("market_sentiment").and_then(Value::as_str).unwrap_or("neutral").to_string(),
        affected_sectors: parsed
            .get("affected_sectors")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    }
}

fn fallback_report() -> EconomistReport {
    EconomistReport {
        first_order_impact: String::new(),
        second_order_impact: String::new(),
        third_order_impact: String::new(),
        market_sentiment: "neutral".to_string(),
        affected_sectors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_report_defaults_sentiment_to_neutral() {
        let parsed = json!({"first_order_impact": "suppliers gain orders"});
        let report = parse_report(&parsed);
        assert_eq!(report.market_sentiment, "neutral");
        assert_eq!(report.first_order_impact, "suppliers gain orders");
    }

    #[test]
    fn test_fallback_report_is_neutral() {
        assert_eq!(fallback_report().market_sentiment, "neutral");
    }
}
