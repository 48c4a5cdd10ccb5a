//! Curator Agent: the daily-digest editor. A deterministic filter/rank/
//! dedup pass narrows the field before an LLM makes the final call, with
//! a fully deterministic fallback if that call fails.

use super::build_trace;
use crate::config::CuratorConfig;
use crate::llm::gateway::{ChatMessage, LlmGateway};
use crate::model::{AgentTrace, CuratedPick, InformationUnit};
use crate::similarity::ratcliff_obershelp;
use serde_json::{json, Value};
use std::time::Instant;

const AGENT_NAME: &str = "Curator";
const TEMPERATURE: f32 = 0.15;
const MAX_TOKENS: u32 = 3000;
const CANDIDATE_CAP: usize = 25;
const DEDUP_TITLE_THRESHOLD: f64 = 0.55;
const DEDUP_TITLE_SOFT_THRESHOLD: f64 = 0.40;
const TOP_PICK_FLOOR: f64 = 7.0;
const QUICK_READ_FLOOR: f64 = 5.5;

const LOW_QUALITY_SOURCES: &[&str] = &["v2ex", "segmentfault", "stackoverflow", "zhihu.com/question"];
const IRRELEVANT_TITLE_KEYWORDS: &[&str] = &["求助", "请问", "如何", "怎么", "怎样", "购房", "买房", "租房", "面试"];

const SYSTEM_PROMPT: &str = "\
You are a strict editor-in-chief curating the day's most valuable items; when in doubt, leave it out. \
Exclude forum posts, personal Q&A, tutorials, pure speculation with no underlying news event, stale \
rehashes, and clickbait. Prefer major events, genuinely deep analysis, and scarce/exclusive \
information. If several items cover the same event, keep only the most substantive one. Score on a \
full 0-10 range; scores below the stated floors don't belong in their bucket. Return JSON: \
{\"daily_summary\": \"...\", \"top_picks\": [{\"id\": \"...\", \"score\": 8.7, \"reason\": \"...\"}], \
\"quick_reads\": [{\"id\": \"...\", \"score\": 6.0, \"reason\": \"...\"}]}.";

pub struct Curator {
    gateway: LlmGateway,
    config: CuratorConfig,
}

pub struct CurationResult {
    pub daily_summary: String,
    pub top_picks: Vec<CuratedPick>,
    pub quick_reads: Vec<CuratedPick>,
    pub total_excluded: usize,
}

impl Curator {
    pub fn new(gateway: LlmGateway, config: CuratorConfig) -> Self {
        Self { gateway, config }
    }

    pub async fn curate(&self, units: &[InformationUnit]) -> (CurationResult, Option<AgentTrace>) {
        if units.is_empty() {
            return (
                CurationResult { daily_summary: "no content today".to_string(), top_picks: vec![], quick_reads: vec![], total_excluded: 0 },
                None,
            );
        }

        let started = Instant::now();
        let total_units = units.len();
        let mut ranked = filter_irrelevant(units);
        ranked.sort_by(|a, b| pre_rank_score(b).partial_cmp(&pre_rank_score(a)).unwrap());
        let unique = deduplicate(ranked);
        let candidates: Vec<&InformationUnit> = unique.iter().take(CANDIDATE_CAP).copied().collect();

        let user_prompt = build_user_prompt(&candidates, self.config.max_top_picks);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

        match self.gateway.chat_json(&messages, Some(MAX_TOKENS), Some(TEMPERATURE)).await {
            Ok((Some(parsed), usage)) => {
                let result = self.enforce_limits(parse_curation(&parsed), total_units);
                let trace = build_trace(
                    AGENT_NAME,
                    &format!("{} candidates", candidates.len()),
                    &format!("{} top picks, {} quick reads", result.top_picks.len(), result.quick_reads.len()),
                    started,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    None,
                );
                (result, Some(trace))
            }
            Ok((None, usage)) => {
                tracing::warn!(event = "curation_failed_using_fallback", reason = "no parseable JSON");
                let trace = build_trace(AGENT_NAME, "fallback", "no parseable JSON", started, usage.prompt_tokens, usage.completion_tokens, None);
                (self.fallback_curation(&unique, total_units), Some(trace))
            }
            Err(err) => {
                tracing::warn!(event = "curation_failed_using_fallback", error = %err);
                let trace = build_trace(AGENT_NAME, "fallback", "llm error", started, 0, 0, Some(err.to_string()));
                (self.fallback_curation(&unique, total_units), Some(trace))
            }
        }
    }

    fn enforce_limits(&self, mut result: CurationResult, total_units: usize) -> CurationResult {
        result.top_picks.retain(|p| p.score >= TOP_PICK_FLOOR);
        result.quick_reads.retain(|p| p.score >= QUICK_READ_FLOOR);

        result.top_picks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        result.top_picks.truncate(self.config.max_top_picks);

        result.quick_reads.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        result.quick_reads.truncate(self.config.max_quick_reads);

        let total = result.top_picks.len() + result.quick_reads.len();
        if total > self.config.max_total {
            let excess = total - self.config.max_total;
            let keep = result.quick_reads.len().saturating_sub(excess);
            result.quick_reads.truncate(keep);
        }

        result.total_excluded = total_units.saturating_sub(result.top_picks.len() + result.quick_reads.len());
        result
    }

    fn fallback_curation(&self, ranked: &[&InformationUnit], total_units: usize) -> CurationResult {
        let filtered: Vec<&InformationUnit> = filter_irrelevant_refs(ranked);
        let max_picks = self.config.max_top_picks;
        let top: Vec<&InformationUnit> = filtered.iter().take(max_picks).copied().collect();
        let rest: Vec<&InformationUnit> = filtered.iter().skip(max_picks).take(12).copied().collect();

        let top_picks = top
            .iter()
            .map(|u| CuratedPick { unit_id: u.id.clone(), score: display_score(u), reason: reasoning(u) })
            .collect();
        let quick_reads = rest
            .iter()
            .map(|u| CuratedPick { unit_id: u.id.clone(), score: display_score(u), reason: "included in fallback digest".to_string() })
            .collect();

        CurationResult {
            daily_summary: "automated digest (AI curation temporarily unavailable)".to_string(),
            top_picks,
            quick_reads,
            total_excluded: total_units.saturating_sub(top.len() + rest.len()),
        }
    }
}

fn pre_rank_score(u: &InformationUnit) -> f64 {
    u.analysis_depth_score * 0.6 + u.importance_score * 0.4
}

fn filter_irrelevant(units: &[InformationUnit]) -> Vec<&InformationUnit> {
    units.iter().filter(|u| passes_filter(u)).collect()
}

fn filter_irrelevant_refs<'a>(units: &[&'a InformationUnit]) -> Vec<&'a InformationUnit> {
    units.iter().copied().filter(|u| passes_filter(u)).collect()
}

fn passes_filter(u: &InformationUnit) -> bool {
    let source_lower = u.primary_source.to_lowercase();
    let title_lower = u.title.to_lowercase();

    let low_quality_source = LOW_QUALITY_SOURCES.iter().any(|s| source_lower.contains(s));
    let irrelevant_title = IRRELEVANT_TITLE_KEYWORDS.iter().any(|kw| title_lower.contains(kw));
    let low_score = u.importance_score < 0.5 && u.analysis_depth_score < 0.5;

    !low_quality_source && !irrelevant_title && !low_score
}

/// Greedy near-duplicate removal: each candidate (already rank-sorted)
/// is compared against units already kept; replaces the kept unit when
/// the new one scores higher, matching the "keep the more substantive
/// one" rule.
fn deduplicate<'a>(ranked: Vec<&'a InformationUnit>) -> Vec<&'a InformationUnit> {
    let mut unique: Vec<&InformationUnit> = Vec::new();
    for unit in ranked {
        let mut dup_index = None;
        for (i, existing) in unique.iter().enumerate() {
            if are_similar(unit, existing) {
                dup_index = Some(i);
                break;
            }
        }
        match dup_index {
            Some(i) => {
                if dedup_rank_score(unit) > dedup_rank_score(unique[i]) {
                    unique[i] = unit;
                }
            }
            None => unique.push(unit),
        }
    }
    unique
}

fn dedup_rank_score(u: &InformationUnit) -> f64 {
    u.analysis_depth_score * 0.7 + u.importance_score * 0.3
}

fn are_similar(a: &InformationUnit, b: &InformationUnit) -> bool {
    let title_sim = ratcliff_obershelp(&a.title, &b.title);
    if title_sim > DEDUP_TITLE_THRESHOLD {
        return true;
    }
    if title_sim > DEDUP_TITLE_SOFT_THRESHOLD {
        let content_sim = ratcliff_obershelp(&content_key(a), &content_key(b));
        if content_sim > DEDUP_TITLE_THRESHOLD {
            return true;
        }
    }
    false
}

fn content_key(u: &InformationUnit) -> String {
    format!("{} {}", u.summary, u.key_insights.iter().take(3).cloned().collect::<Vec<_>>().join(" "))
}

fn build_user_prompt(candidates: &[&InformationUnit], max_top_picks: usize) -> String {
    let items: Vec<Value> = candidates
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "title": u.title,
                "source": u.sources.first().map(|s| s.source_name.clone()).unwrap_or_else(|| u.primary_source.clone()),
                "summary": truncate(&u.summary, 300),
                "analysis_content": truncate(&u.analysis_content, 400),
                "key_insights": u.key_insights.iter().take(3).collect::<Vec<_>>(),
                "depth_score": u.analysis_depth_score,
                "importance": u.importance_score,
            })
        })
        .collect();
    format!(
        "Select strictly from these {} candidates (top_picks <= {}, quick_reads <= 15):\n{}",
        candidates.len(),
        max_top_picks,
        Value::Array(items)
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn parse_curation(parsed: &Value) -> CurationResult {
    let daily_summary = parsed.get("daily_summary").and_then(Value::as_str).unwrap_or("").to_string();
    let top_picks = parse_picks(parsed, "top_picks");
    let quick_reads = parse_picks(parsed, "quick_reads");
    CurationResult { daily_summary, top_picks, quick_reads, total_excluded: 0 }
}

fn parse_picks(parsed: &Value, key: &str) -> Vec<CuratedPick> {
    parsed
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    let unit_id = p.get("id")?.as_str()?.to_string();
                    let score = p.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                    let reason = p.get("reason").and_then(Value::as_str).unwrap_or("").to_string();
                    Some(CuratedPick { unit_id, score, reason })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn display_score(u: &InformationUnit) -> f64 {
    let base = (u.analysis_depth_score * 0.6 + u.importance_score * 0.4) * 10.0;
    base.clamp(6.5, 9.8)
}

fn reasoning(u: &InformationUnit) -> String {
    if u.importance_score > 0.8 {
        "high importance".to_string()
    } else if u.analysis_depth_score > 0.8 {
        "strong analytical depth".to_string()
    } else {
        "selected on combined score".to_string()
    }
}
