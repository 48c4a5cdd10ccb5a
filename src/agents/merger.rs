//! Merger Agent: fuses N candidate/existing units reporting the same
//! underlying event into one canonical unit.

use super::build_trace;
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{union_sources, AgentTrace, InformationUnit, Sentiment};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Instant;

const AGENT_NAME: &str = "Merger";
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 2000;

const SYSTEM_PROMPT: &str = "\
You fuse several information units describing the same event into one authoritative version. \
Synthesize facts (if one source gives a time and another a place, the merged version has both); call \
out factual conflicts explicitly rather than silently picking one side; weave the analyses into one \
coherent deep-dive rather than concatenating them; re-score credibility upward when multiple \
independent sources agree, and re-score analysis depth to match the richer merged content. Return a \
JSON object with: title, content, summary, analysis_content, key_insights, analysis_depth_score (0-1), \
who, what, when, where, why, how, credibility_score, importance_score, impact_assessment, sentiment, \
tags. Ignore sources/id — those are merged separately.";

pub struct Merger {
    gateway: LlmGateway,
}

impl Merger {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    /// Merges `units` into one canonical unit. Preserves the **first**
    /// unit's `id`/`fingerprint` so downstream references stay stable.
    /// Sources are always unioned, `merged_count` always summed —
    /// regardless of whether the LLM call itself succeeds.
    pub async fn merge(&self, units: &[InformationUnit]) -> (InformationUnit, Option<AgentTrace>) {
        assert!(!units.is_empty(), "merge requires at least one unit");
        if units.len() == 1 {
            return (units[0].clone(), None);
        }

        let started = Instant::now();
        let base = &units[0];
        let user_prompt = build_user_prompt(units);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        let mut merged = match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let trace = build_trace(AGENT_NAME, &base.title, "merged via LLM", started, usage.prompt_tokens, usage.completion_tokens, None);
                (apply_merge_result(base, &parsed), Some(trace))
            }
            Ok((None, usage)) => {
                let trace = build_trace(AGENT_NAME, &base.title, "fallback: no parseable JSON", started, usage.prompt_tokens, usage.completion_tokens, None);
                (base.clone(), Some(trace))
            }
            Err(err) => {
                tracing::warn!(event = "llm_call_failed", agent = AGENT_NAME, error = %err);
                let trace = build_trace(AGENT_NAME, &base.title, "fallback: llm error", started, 0, 0, Some(err.to_string()));
                (base.clone(), Some(trace))
            }
        };

        // Sources and merged_count always derive from the full input set,
        // independent of whatever the LLM call produced.
        let mut all_sources = Vec::new();
        for u in units {
            union_sources(&mut all_sources, u.sources.clone());
        }
        merged.0.sources = all_sources;
        merged.0.merged_count = units.iter().map(|u| u.merged_count).sum();
        merged.0.entity_hierarchy = dedup_entity_hierarchy(units);

        (merged.0, merged.1)
    }
}

fn build_user_prompt(units: &[InformationUnit]) -> String {
    let items: Vec<Value> = units
        .iter()
        .map(|u| {
            json!({
                "title": u.title,
                "content": u.content,
                "analysis_content": u.analysis_content,
                "key_insights": u.key_insights,
                "source_count": u.source_count(),
                "credibility": u.credibility_score,
            })
        })
        .collect();
    format!("Merge these {} information units:\n{}", units.len(), Value::Array(items))
}

fn apply_merge_result(base: &InformationUnit, result: &Value) -> InformationUnit {
    let mut merged = base.clone();

    if let Some(v) = result.get("title").and_then(Value::as_str) {
        merged.title = v.to_string();
    }
    if let Some(v) = result.get("content").and_then(Value::as_str) {
        merged.content = v.to_string();
    }
    if let Some(v) = result.get("summary").and_then(Value::as_str) {
        merged.summary = v.to_string();
    }
    if let Some(v) = result.get("analysis_content").and_then(Value::as_str) {
        merged.analysis_content = v.to_string();
    }
    if let Some(arr) = result.get("key_insights").and_then(Value::as_array) {
        merged.key_insights = arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }
    if let Some(v) = result.get("analysis_depth_score").and_then(Value::as_f64) {
        merged.analysis_depth_score = v;
    }
    if let Some(v) = result.get("who").and_then(Value::as_array) {
        merged.who = v.iter().filter_map(|x| x.as_str().map(str::to_string)).collect();
    }
    if let Some(v) = result.get("what").and_then(Value::as_str) {
        merged.what = v.to_string();
    }
    if let Some(v) = result.get("when").and_then(Value::as_str) {
        merged.when = v.to_string();
    }
    if let Some(v) = result.get("where").and_then(Value::as_str) {
        merged.where_ = v.to_string();
    }
    if let Some(v) = result.get("why").and_then(Value::as_str) {
        merged.why = v.to_string();
    }
    if let Some(v) = result.get("how").and_then(Value::as_str) {
        merged.how = v.to_string();
    }
    if let Some(v) = result.get("credibility_score").and_then(Value::as_f64) {
        merged.credibility_score = v;
    }
    if let Some(v) = result.get("importance_score").and_then(Value::as_f64) {
        merged.importance_score = v;
    }
    if let Some(v) = result.get("impact_assessment").and_then(Value::as_str) {
        merged.impact_assessment = v.to_string();
    }
    if let Some(v) = result.get("sentiment").and_then(Value::as_str) {
        merged.sentiment = Sentiment::parse_or_default(v);
    }
    if let Some(arr) = result.get("tags").and_then(Value::as_array) {
        let mut tags: HashSet<String> = merged.tags.iter().cloned().collect();
        tags.extend(arr.iter().filter_map(|v| v.as_str().map(str::to_string)));
        merged.tags = tags.into_iter().collect();
    }

    merged.updated_at = chrono::Utc::now();
    merged
}

/// Dedups entity anchors across all merged-in units by `(l1_name, l3_root)`,
/// keeping the first (highest-confidence-ordering is the extractor's job,
/// not the merger's) occurrence of each pair.
fn dedup_entity_hierarchy(units: &[InformationUnit]) -> Vec<crate::model::EntityAnchor> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();
    for u in units {
        for anchor in &u.entity_hierarchy {
            let key = (anchor.l1_name.clone(), anchor.l3_root.clone());
            if seen.insert(key) {
                out.push(anchor.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InformationType, SourceReference, TimeSensitivity};
    use chrono::Utc;

    fn sample_unit(id: &str, url: &str) -> InformationUnit {
        InformationUnit {
            id: id.to_string(),
            fingerprint: format!("fp_{id}"),
            kind: InformationType::Fact,
            title: format!("title {id}"),
            content: "content".to_string(),
            summary: String::new(),
            event_time: None,
            report_time: None,
            time_sensitivity: TimeSensitivity::Normal,
            analysis_content: String::new(),
            key_insights: vec![],
            analysis_depth_score: 0.5,
            information_gain: 5.0,
            actionability: 5.0,
            scarcity: 5.0,
            impact_magnitude: 5.0,
            state_change_type: None,
            state_change_subtypes: vec![],
            entity_hierarchy: vec![],
            who: vec![],
            what: String::new(),
            when: String::new(),
            where_: String::new(),
            why: String::new(),
            how: String::new(),
            sources: vec![SourceReference {
                url: url.to_string(),
                title: "t".to_string(),
                source_name: "s".to_string(),
                published_at: None,
                excerpt: String::new(),
                credibility_tier: "unknown".to_string(),
            }],
            primary_source: url.to_string(),
            extraction_confidence: 0.8,
            credibility_score: 0.5,
            importance_score: 0.5,
            sentiment: Sentiment::Neutral,
            impact_assessment: String::new(),
            related_unit_ids: vec![],
            tags: vec!["a".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            merged_count: 1,
            is_sent: false,
            entity_processed: false,
        }
    }

    #[tokio::test]
    async fn test_merge_single_unit_is_identity() {
        let gateway = LlmGateway::new(crate::config::LlmConfig::default(), None);
        let merger = Merger::new(gateway);
        let unit = sample_unit("iu_1", "https://a.example/1");
        let (merged, trace) = merger.merge(std::slice::from_ref(&unit)).await;
        assert_eq!(merged.id, unit.id);
        assert!(trace.is_none());
    }

    #[test]
    fn test_apply_merge_result_overrides_only_present_fields() {
        let base = sample_unit("iu_1", "https://a.example/1");
        let result = json!({"title": "new title"});
        let merged = apply_merge_result(&base, &result);
        assert_eq!(merged.title, "new title");
        assert_eq!(merged.content, base.content);
    }

    #[test]
    fn test_dedup_entity_hierarchy_keys_on_name_and_root() {
        use crate::model::EntityAnchor;
        let mut a = sample_unit("iu_1", "https://a.example/1");
        let mut b = sample_unit("iu_2", "https://b.example/1");
        let anchor = EntityAnchor { l1_name: "Acme".to_string(), l1_role: Default::default(), l2_sector: String::new(), l3_root: "软件与开发工具".to_string(), confidence: 0.8 };
        a.entity_hierarchy.push(anchor.clone());
        b.entity_hierarchy.push(anchor);
        let deduped = dedup_entity_hierarchy(&[a, b]);
        assert_eq!(deduped.len(), 1);
    }
}
