//! Extractor Agent: one article → zero or more candidate units, each
//! carrying its own entity anchors, 4D scores, HEX classification, and
//! (for entity-graph ingestion) the entities/relations it mentions.

use super::build_trace;
use crate::fingerprint::{fingerprint, unit_id};
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{
    resolve_root_entity, AgentContext, AgentOutput, EntityAnchor, EntityRole, ExtractedEntity, ExtractedRelation,
    InformationType, InformationUnit, Sentiment, SourceReference, StateChangeType, TimeSensitivity,
};
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;

const AGENT_NAME: &str = "Extractor";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 4000;
/// Articles are truncated before prompting; the LLM doesn't need the
/// full body to extract atomic facts, and this bounds prompt cost.
const MAX_CONTENT_CHARS: usize = 8000;

const SYSTEM_PROMPT: &str = "\
You are an information extraction agent. Split the given article into atomic, independent facts, \
events, opinions, or data points. For each, populate: type (fact|opinion|event|data), title, content, \
summary, analysis_content, key_insights, analysis_depth_score (0-1), information_gain/actionability/\
scarcity/impact_magnitude (1-10), state_change_type (one of TECH, CAPITAL, REGULATION, ORG, RISK, \
SENTIMENT, or omit), entity_hierarchy (list of {l1_name, l1_role, l2_sector, l3_root, confidence}), \
who, what, when, where, why, how, extraction_confidence, credibility_score, importance_score, \
sentiment (positive|neutral|negative), impact_assessment, tags, entities (list of {name, aliases, \
entity_type, l3_root, l2_sector, role, sentiment, state_change}), and relations (list of {source_name, \
target_name, relation_type, strength, confidence}). Return {\"units\": [...]}. If the article contains \
nothing extractable, return {\"units\": []}.";

/// One extracted unit plus the entity-graph ingestion payload it
/// carries. The orchestrator passes `entities`/`relations` to
/// `EntityStore::process_extracted` after the unit itself is saved.
#[derive(Debug, Clone)]
pub struct ExtractionCandidate {
    pub unit: InformationUnit,
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

pub struct Extractor {
    gateway: LlmGateway,
}

impl Extractor {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    pub async fn process(
        &self,
        article_title: &str,
        article_content: &str,
        source: &SourceReference,
        context: &AgentContext,
    ) -> AgentOutput<Vec<ExtractionCandidate>> {
        let started = Instant::now();
        let truncated: String = article_content.chars().take(MAX_CONTENT_CHARS).collect();
        let user_prompt = build_user_prompt(article_title, &truncated, context);

        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let candidates = parse_candidates(&parsed, source);
                let trace = build_trace(
                    AGENT_NAME,
                    article_title,
                    &format!("{} candidates", candidates.len()),
                    started,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    None,
                );
                AgentOutput::success(candidates, trace)
            }
            Ok((None, usage)) => {
                // Gateway responded but nothing salvaged as JSON: never
                // fabricate, emit zero candidates rather than guess.
                let trace = build_trace(
                    AGENT_NAME,
                    article_title,
                    "no parseable JSON",
                    started,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    None,
                );
                AgentOutput::success(Vec::new(), trace)
            }
            Err(err) => {
                tracing::warn!(event = "article_analysis_failed", agent = AGENT_NAME, error = %err);
                AgentOutput::failure(AGENT_NAME, err.to_string(), started.elapsed().as_secs_f64())
            }
        }
    }
}

fn build_user_prompt(title: &str, content: &str, context: &AgentContext) -> String {
    let mut prompt = format!("Title: {title}\n\nContent:\n{content}\n");
    if let Some(skeptic) = &context.analyst_reports.skeptic {
        prompt.push_str(&format!("\nSkeptic notes: credibility_tier={}, red_flags={:?}\n", skeptic.credibility_tier, skeptic.red_flags));
    }
    if let Some(economist) = &context.analyst_reports.economist {
        prompt.push_str(&format!("\nEconomist notes: first_order={}, sentiment={}\n", economist.first_order_impact, economist.market_sentiment));
    }
    if let Some(detective) = &context.analyst_reports.detective {
        prompt.push_str(&format!("\nDetective notes: stakeholders={:?}\n", detective.stakeholders));
    }
    prompt
}

fn parse_candidates(parsed: &Value, source: &SourceReference) -> Vec<ExtractionCandidate> {
    let units = match parsed.get("units").and_then(Value::as_array) {
        Some(units) => units,
        None => return Vec::new(),
    };

    units.iter().filter_map(|raw| parse_one_candidate(raw, source)).collect()
}

fn parse_one_candidate(raw: &Value, source: &SourceReference) -> Option<ExtractionCandidate> {
    let title = raw.get("title")?.as_str()?.to_string();
    let content = raw.get("content").and_then(Value::as_str).unwrap_or("").to_string();
    if title.is_empty() {
        return None;
    }

    let fp = fingerprint(&title, &content);
    let now = Utc::now();

    let state_change_type = raw
        .get("state_change_type")
        .and_then(Value::as_str)
        .and_then(StateChangeType::parse);

    let entity_hierarchy = raw
        .get("entity_hierarchy")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_entity_anchor).collect())
        .unwrap_or_default();

    let unit = InformationUnit {
        id: unit_id(&fp),
        fingerprint: fp,
        kind: raw
            .get("type")
            .and_then(Value::as_str)
            .map(InformationType::parse_or_default)
            .unwrap_or(InformationType::Fact),
        title,
        content,
        summary: string_field(raw, "summary"),
        event_time: raw.get("event_time").and_then(Value::as_str).map(str::to_string),
        report_time: Some(now),
        time_sensitivity: raw
            .get("time_sensitivity")
            .and_then(Value::as_str)
            .map(|s| match s {
                "urgent" => TimeSensitivity::Urgent,
                "evergreen" => TimeSensitivity::Evergreen,
                _ => TimeSensitivity::Normal,
            })
            .unwrap_or_default(),
        analysis_content: string_field(raw, "analysis_content"),
        key_insights: string_list(raw, "key_insights"),
        analysis_depth_score: float_field(raw, "analysis_depth_score", 0.0),
        information_gain: coerce_dimension(raw, "information_gain"),
        actionability: coerce_dimension(raw, "actionability"),
        scarcity: coerce_dimension(raw, "scarcity"),
        impact_magnitude: coerce_dimension(raw, "impact_magnitude"),
        state_change_type,
        state_change_subtypes: string_list(raw, "state_change_subtypes"),
        entity_hierarchy,
        who: polymorphic_string_list(raw, "who"),
        what: string_field(raw, "what"),
        when: string_field(raw, "when"),
        where_: string_field(raw, "where"),
        why: string_field(raw, "why"),
        how: string_field(raw, "how"),
        sources: vec![source.clone()],
        primary_source: source.url.clone(),
        extraction_confidence: float_field(raw, "extraction_confidence", 0.8),
        credibility_score: float_field(raw, "credibility_score", 0.5),
        importance_score: float_field(raw, "importance_score", 0.5),
        sentiment: raw.get("sentiment").and_then(Value::as_str).map(Sentiment::parse_or_default).unwrap_or_default(),
        impact_assessment: string_field(raw, "impact_assessment"),
        related_unit_ids: Vec::new(),
        tags: string_list(raw, "tags"),
        created_at: now,
        updated_at: now,
        merged_count: 1,
        is_sent: false,
        entity_processed: false,
    };

    let entities = raw
        .get("entities")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|e| serde_json::from_value::<ExtractedEntity>(e.clone()).ok()).collect())
        .unwrap_or_default();
    let relations = raw
        .get("relations")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|r| serde_json::from_value::<ExtractedRelation>(r.clone()).ok()).collect())
        .unwrap_or_default();

    Some(ExtractionCandidate { unit, entities, relations })
}

fn parse_entity_anchor(raw: &Value) -> Option<EntityAnchor> {
    let l1_name = raw.get("l1_name")?.as_str()?.to_string();
    let l3_root_raw = raw.get("l3_root").and_then(Value::as_str).unwrap_or("");
    Some(EntityAnchor {
        l1_name,
        l1_role: raw
            .get("l1_role")
            .and_then(Value::as_str)
            .map(EntityRole::parse_or_default)
            .unwrap_or_default(),
        l2_sector: raw.get("l2_sector").and_then(Value::as_str).unwrap_or("").to_string(),
        l3_root: resolve_root_entity(l3_root_raw).to_string(),
        confidence: raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.8),
    })
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn float_field(raw: &Value, key: &str, default: f64) -> f64 {
    raw.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Coerces a 4D dimension into `[1, 10]`, defaulting to 5.0 on any
/// parse failure or out-of-range value rather than rejecting the unit.
fn coerce_dimension(raw: &Value, key: &str) -> f64 {
    match raw.get(key).and_then(Value::as_f64) {
        Some(v) if (1.0..=10.0).contains(&v) => v,
        _ => 5.0,
    }
}

fn string_list(raw: &Value, key: &str) -> Vec<String> {
    match raw.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Some models return `who` (and similarly-shaped fields) as a bare
/// string rather than a list; normalize both to a list.
fn polymorphic_string_list(raw: &Value, key: &str) -> Vec<String> {
    string_list(raw, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_source() -> SourceReference {
        SourceReference {
            url: "https://example.com/article".to_string(),
            title: "Example".to_string(),
            source_name: "example".to_string(),
            published_at: None,
            excerpt: String::new(),
            credibility_tier: "unknown".to_string(),
        }
    }

    #[test]
    fn test_parse_candidates_empty_units_yields_nothing() {
        let parsed = json!({"units": []});
        assert!(parse_candidates(&parsed, &sample_source()).is_empty());
    }

    #[test]
    fn test_parse_one_candidate_attaches_single_source() {
        let raw = json!({
            "title": "Company X raises funding",
            "content": "Company X raised $10M",
            "type": "event",
            "information_gain": 7.0,
            "who": "Company X",
        });
        let candidate = parse_one_candidate(&raw, &sample_source()).unwrap();
        assert_eq!(candidate.unit.sources.len(), 1);
        assert_eq!(candidate.unit.who, vec!["Company X".to_string()]);
    }

    #[test]
    fn test_coerce_dimension_defaults_on_out_of_range() {
        let raw = json!({"information_gain": 99.0});
        assert_eq!(coerce_dimension(&raw, "information_gain"), 5.0);
        let raw = json!({"information_gain": 7.5});
        assert_eq!(coerce_dimension(&raw, "information_gain"), 7.5);
    }

    #[test]
    fn test_state_change_type_invalid_is_dropped() {
        let raw = json!({
            "title": "t",
            "content": "c",
            "state_change_type": "NOT_HEX",
        });
        let candidate = parse_one_candidate(&raw, &sample_source()).unwrap();
        assert!(candidate.unit.state_change_type.is_none());
    }

    #[test]
    fn test_entity_hierarchy_root_falls_back_to_other() {
        let raw = json!({
            "title": "t",
            "content": "c",
            "entity_hierarchy": [{"l1_name": "Foo Corp", "l3_root": "不存在的领域"}],
        });
        let candidate = parse_one_candidate(&raw, &sample_source()).unwrap();
        assert_eq!(candidate.unit.entity_hierarchy[0].l3_root, crate::model::ROOT_ENTITY_FALLBACK);
    }

    #[test]
    fn test_polymorphic_who_accepts_list_or_string() {
        let as_list = json!({"title": "t", "content": "c", "who": ["A", "B"]});
        let candidate = parse_one_candidate(&as_list, &sample_source()).unwrap();
        assert_eq!(candidate.unit.who, vec!["A".to_string(), "B".to_string()]);

        let as_string = json!({"title": "t", "content": "c", "who": "A"});
        let candidate = parse_one_candidate(&as_string, &sample_source()).unwrap();
        assert_eq!(candidate.unit.who, vec!["A".to_string()]);
    }
}
