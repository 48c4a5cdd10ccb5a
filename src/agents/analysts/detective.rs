//! Detective: stakeholder mapping and hidden relationships.

use crate::agents::build_trace;
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{AgentTrace, DetectiveReport, RelationCandidate};
use serde_json::Value;
use std::time::Instant;

const AGENT_NAME: &str = "Detective";
const TEMPERATURE: f32 = 0.4;
const MAX_TOKENS: u32 = 1500;
const MAX_CONTENT_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "\
You are an investigative reporter mapping hidden relationships and interest chains in a news event. \
Name who benefits, who loses, and any non-obvious connections — but only ones you can support from \
the text; say so plainly when the evidence runs out rather than inventing a connection. Return JSON: \
{\"stakeholders\": [...], \"relationships\": [{\"entity_a\": \"...\", \"entity_b\": \"...\", \
\"relationship\": \"...\", \"confidence\": 0.8}], \"hidden_motives\": [...]}.";

pub struct Detective {
    gateway: LlmGateway,
}

impl Detective {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    pub async fn process(&self, title: &str, summary: &str, known_entities: &[String]) -> (DetectiveReport, AgentTrace) {
        let started = Instant::now();
        let truncated: String = summary.chars().take(MAX_CONTENT_CHARS).collect();
        let entities_text = if known_entities.is_empty() {
            "none identified".to_string()
        } else {
            known_entities.iter().take(15).cloned().collect::<Vec<_>>().join(", ")
        };
        let user_prompt = format!("Title: {title}\nSummary: {truncated}\nKnown entities: {entities_text}");
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let report = parse_report(&parsed);
                let trace = build_trace(
                    AGENT_NAME,
                    title,
                    &format!("{} relationships", report.relationships.len()),
                    started,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    None,
                );
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

fn parse_report(parsed: &Value) -> DetectiveReport {
    let stakeholders = parsed
        .get("stakeholders")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let relationships = parsed
        .get("relationships")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_relation_candidate).collect())
        .unwrap_or_default();

    let hidden_motives = parsed
        .get("hidden_motives")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    DetectiveReport { stakeholders, relationships, hidden_motives }
}

fn parse_relation_candidate(raw: &Value) -> Option<RelationCandidate> {
    Some(RelationCandidate {
        entity_a: raw.get("entity_a")?.as_str()?.to_string(),
        entity_b: raw.get("entity_b")?.as_str()?.to_string(),
        relationship: raw.get("relationship").and_then(Value::as_str).unwrap_or("").to_string(),
        confidence: raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
    })
}

fn fallback_report() -> DetectiveReport {
    DetectiveReport { stakeholders: Vec::new(), relationships: Vec::new(), hidden_motives: Vec::new() }
}
