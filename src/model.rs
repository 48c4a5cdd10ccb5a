//! Information Unit / Entity Graph data model.
//!
//! `InformationUnit` is the atomic deliverable produced by the pipeline.
//! `value_score` is always derived from the 4D dimensions (never stored)
//! so there is no way for a cached score to drift from its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fixed ~18-element vocabulary of top-level domains anchoring the L3 of
/// every `entity_hierarchy` entry. Values outside this list (and outside
/// the "其他" fallback) never make it into storage.
pub const ROOT_ENTITIES: &[&str] = &[
    "人工智能",
    "半导体芯片",
    "消费电子",
    "云计算与数据中心",
    "软件与开发工具",
    "区块链与加密货币",
    "网络安全",
    "电商与零售",
    "社交媒体",
    "游戏与娱乐",
    "内容与流媒体",
    "金融与银行",
    "汽车与出行",
    "能源与环境",
    "医疗与生物科技",
    "制造与工业",
    "宏观经济",
    "地缘政治",
];

/// Fallback root when an extracted `l3_root` doesn't match the vocabulary,
/// even after substring matching.
pub const ROOT_ENTITY_FALLBACK: &str = "其他";

/// Resolves a free-text root name to an entry in [`ROOT_ENTITIES`]: exact
/// match first, then substring containment either direction, then the
/// fallback sentinel.
pub fn resolve_root_entity(candidate: &str) -> &'static str {
    if let Some(exact) = ROOT_ENTITIES.iter().find(|&&root| root == candidate) {
        return exact;
    }
    if let Some(contains) = ROOT_ENTITIES
        .iter()
        .find(|&&root| candidate.contains(root) || root.contains(candidate))
    {
        return contains;
    }
    ROOT_ENTITY_FALLBACK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationType {
    Fact,
    Opinion,
    Event,
    Data,
}

impl InformationType {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "opinion" => InformationType::Opinion,
            "event" => InformationType::Event,
            "data" => InformationType::Data,
            _ => InformationType::Fact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSensitivity {
    Urgent,
    Normal,
    Evergreen,
}

impl Default for TimeSensitivity {
    fn default() -> Self {
        TimeSensitivity::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Default for Sentiment {
    fn default() -> Self {
        Sentiment::Neutral
    }
}

impl Sentiment {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

/// HEX: the fixed six-way taxonomy of state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChangeType {
    #[serde(rename = "TECH")]
    Tech,
    #[serde(rename = "CAPITAL")]
    Capital,
    #[serde(rename = "REGULATION")]
    Regulation,
    #[serde(rename = "ORG")]
    Org,
    #[serde(rename = "RISK")]
    Risk,
    #[serde(rename = "SENTIMENT")]
    Sentiment,
}

impl StateChangeType {
    /// Validates a raw extractor string against HEX; invalid values are
    /// dropped rather than coerced (per the extractor's validation rule).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "TECH" => Some(StateChangeType::Tech),
            "CAPITAL" => Some(StateChangeType::Capital),
            "REGULATION" => Some(StateChangeType::Regulation),
            "ORG" => Some(StateChangeType::Org),
            "RISK" => Some(StateChangeType::Risk),
            "SENTIMENT" => Some(StateChangeType::Sentiment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateChangeType::Tech => "TECH",
            StateChangeType::Capital => "CAPITAL",
            StateChangeType::Regulation => "REGULATION",
            StateChangeType::Org => "ORG",
            StateChangeType::Risk => "RISK",
            StateChangeType::Sentiment => "SENTIMENT",
        }
    }
}

/// Role an entity plays in one `entity_hierarchy` anchor: protagonist,
/// supporting, or merely mentioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRole {
    #[serde(rename = "主角")]
    Protagonist,
    #[serde(rename = "配角")]
    Supporting,
    #[serde(rename = "提及")]
    Mentioned,
}

impl Default for EntityRole {
    fn default() -> Self {
        EntityRole::Protagonist
    }
}

impl EntityRole {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "配角" => EntityRole::Supporting,
            "提及" => EntityRole::Mentioned,
            _ => EntityRole::Protagonist,
        }
    }
}

/// Three-level entity anchor used for hierarchical retrieval:
/// leaf entity → sector → root domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAnchor {
    pub l1_name: String,
    #[serde(default)]
    pub l1_role: EntityRole,
    pub l2_sector: String,
    pub l3_root: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

/// A reference to the article a unit (or a merge input) came from.
/// Equality and dedup are keyed on `url` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default = "default_credibility_tier")]
    pub credibility_tier: String,
}

fn default_credibility_tier() -> String {
    "unknown".to_string()
}

impl PartialEq for SourceReference {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}
impl Eq for SourceReference {}

/// Merges `incoming` into `sources`, deduplicating by URL. The first
/// occurrence of a URL wins; later duplicates are dropped.
pub fn union_sources(sources: &mut Vec<SourceReference>, incoming: impl IntoIterator<Item = SourceReference>) {
    let mut seen: HashSet<String> = sources.iter().map(|s| s.url.clone()).collect();
    for s in incoming {
        if seen.insert(s.url.clone()) {
            sources.push(s);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationUnit {
    pub id: String,
    pub fingerprint: String,

    #[serde(rename = "type")]
    pub kind: InformationType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,

    pub event_time: Option<String>,
    pub report_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_sensitivity: TimeSensitivity,

    #[serde(default)]
    pub analysis_content: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub analysis_depth_score: f64,

    #[serde(default = "default_dimension")]
    pub information_gain: f64,
    #[serde(default = "default_dimension")]
    pub actionability: f64,
    #[serde(default = "default_dimension")]
    pub scarcity: f64,
    #[serde(default = "default_dimension")]
    pub impact_magnitude: f64,

    pub state_change_type: Option<StateChangeType>,
    #[serde(default)]
    pub state_change_subtypes: Vec<String>,

    #[serde(default)]
    pub entity_hierarchy: Vec<EntityAnchor>,

    #[serde(default)]
    pub who: Vec<String>,
    #[serde(default)]
    pub what: String,
    #[serde(default)]
    pub when: String,
    #[serde(default, rename = "where")]
    pub where_: String,
    #[serde(default)]
    pub why: String,
    #[serde(default)]
    pub how: String,

    #[serde(default)]
    pub sources: Vec<SourceReference>,
    #[serde(default)]
    pub primary_source: String,
    #[serde(default)]
    pub extraction_confidence: f64,

    #[serde(default)]
    pub credibility_score: f64,
    #[serde(default)]
    pub importance_score: f64,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub impact_assessment: String,

    #[serde(default)]
    pub related_unit_ids: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_merged_count")]
    pub merged_count: u32,
    #[serde(default)]
    pub is_sent: bool,
    #[serde(default)]
    pub entity_processed: bool,
}

fn default_dimension() -> f64 {
    5.0
}

fn default_merged_count() -> u32 {
    1
}

impl InformationUnit {
    /// Weighted mean of the 4D dimensions. Derived on every call, never
    /// cached on the struct, so it can't drift from its inputs.
    pub fn value_score(&self) -> f64 {
        self.information_gain * 0.30
            + self.actionability * 0.25
            + self.scarcity * 0.20
            + self.impact_magnitude * 0.25
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn merge_source(&mut self, new_source: SourceReference) {
        if !self.sources.iter().any(|s| s.url == new_source.url) {
            self.sources.push(new_source);
        }
    }
}

/// Fixed 11-element relation vocabulary (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Competitor,
    Partner,
    Supplier,
    Customer,
    Investor,
    ParentOf,
    SubsidiaryOf,
    CeoOf,
    FounderOf,
    EmployeeOf,
    Peer,
}

impl RelationType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "competitor" => Some(RelationType::Competitor),
            "partner" => Some(RelationType::Partner),
            "supplier" => Some(RelationType::Supplier),
            "customer" => Some(RelationType::Customer),
            "investor" => Some(RelationType::Investor),
            "parent_of" => Some(RelationType::ParentOf),
            "subsidiary_of" => Some(RelationType::SubsidiaryOf),
            "ceo_of" => Some(RelationType::CeoOf),
            "founder_of" => Some(RelationType::FounderOf),
            "employee_of" => Some(RelationType::EmployeeOf),
            "peer" => Some(RelationType::Peer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Competitor => "competitor",
            RelationType::Partner => "partner",
            RelationType::Supplier => "supplier",
            RelationType::Customer => "customer",
            RelationType::Investor => "investor",
            RelationType::ParentOf => "parent_of",
            RelationType::SubsidiaryOf => "subsidiary_of",
            RelationType::CeoOf => "ceo_of",
            RelationType::FounderOf => "founder_of",
            RelationType::EmployeeOf => "employee_of",
            RelationType::Peer => "peer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Company,
    Person,
    Product,
    Org,
    Concept,
    Location,
    Event,
}

impl EntityType {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.to_uppercase().as_str() {
            "PERSON" => EntityType::Person,
            "PRODUCT" => EntityType::Product,
            "ORG" => EntityType::Org,
            "CONCEPT" => EntityType::Concept,
            "LOCATION" => EntityType::Location,
            "EVENT" => EntityType::Event,
            _ => EntityType::Company,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub l3_root: String,
    pub l2_sector: String,
    pub mention_count: u64,
    pub first_mentioned: Option<DateTime<Utc>>,
    pub last_mentioned: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub alias: String,
    pub entity_id: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub entity_id: String,
    pub unit_id: String,
    pub role: EntityRole,
    pub sentiment: Sentiment,
    pub state_dimension: Option<StateChangeType>,
    pub state_delta: Option<String>,
    pub event_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub strength: f64,
    pub confidence: f64,
    pub evidence_unit_ids: Vec<String>,
}

/// Direction filter for `EntityStore::get_relations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    Outgoing,
    Incoming,
    Both,
}

/// Trend classification produced by `EntityStore::get_hot_entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
    New,
}

/// Extractor-output-shaped entity, before alias resolution creates a
/// durable `Entity` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    pub l3_root: String,
    #[serde(default)]
    pub l2_sector: String,
    #[serde(default)]
    pub role: EntityRole,
    #[serde(default)]
    pub sentiment: Sentiment,
    pub state_change: Option<StateChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub dimension: StateChangeType,
    pub delta: String,
}

/// Extractor-output-shaped relation: endpoints given by entity name,
/// resolved against the id map built while processing entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source_name: String,
    pub target_name: String,
    pub relation_type: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default = "default_relation_confidence")]
    pub confidence: f64,
}

fn default_strength() -> f64 {
    1.0
}
fn default_relation_confidence() -> f64 {
    0.8
}

/// One fetched feed entry. URL is the durable identity; the fetcher
/// (out of scope here) must not hand the same URL to the pipeline twice
/// concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
    pub source: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// QUICK/STANDARD/DEEP pipeline variant; only DEEP invokes the analysts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    Quick,
    Standard,
    Deep,
}

/// One agent invocation's diagnostic record, threaded through the
/// orchestrator's per-article context. Independent of (and in addition
/// to) the durable `ai_calls` telemetry table: traces are in-memory,
/// per-run, surfaced in logs; telemetry is the cross-run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_seconds: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub error: Option<String>,
}

/// Generic success/failure envelope every agent's `process` returns.
#[derive(Debug, Clone)]
pub struct AgentOutput<T> {
    pub success: bool,
    pub data: Option<T>,
    pub trace: Option<AgentTrace>,
    pub error: Option<String>,
}

impl<T> AgentOutput<T> {
    pub fn success(data: T, trace: AgentTrace) -> Self {
        Self {
            success: true,
            data: Some(data),
            trace: Some(trace),
            error: None,
        }
    }

    pub fn failure(agent_name: &str, error: String, duration: f64) -> Self {
        Self {
            success: false,
            data: None,
            trace: Some(AgentTrace {
                agent_name: agent_name.to_string(),
                timestamp: Utc::now(),
                input_summary: String::new(),
                output_summary: String::new(),
                duration_seconds: duration,
                prompt_tokens: 0,
                completion_tokens: 0,
                error: Some(error.clone()),
            }),
            error: Some(error),
        }
    }
}

/// Reports produced by the three consultant analysts (DEEP mode only).
/// Each has an empty/neutral `Default`, substituted on analyst failure
/// so a single analyst's error never blocks extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkepticReport {
    pub credibility_tier: String,
    pub bias_indicators: Vec<String>,
    pub red_flags: Vec<String>,
    pub verification_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconomistReport {
    pub first_order_impact: String,
    pub second_order_impact: String,
    pub third_order_impact: String,
    pub market_sentiment: String,
    pub affected_sectors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationCandidate {
    pub entity_a: String,
    pub entity_b: String,
    pub relationship: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectiveReport {
    pub stakeholders: Vec<String>,
    pub relationships: Vec<RelationCandidate>,
    pub hidden_motives: Vec<String>,
}

/// Per-article analyst reports, keyed by analyst name, attached to the
/// extractor's prompt context. Missing keys mean that analyst failed
/// or DEEP mode wasn't requested, not an error.
#[derive(Debug, Clone, Default)]
pub struct AnalystReports {
    pub skeptic: Option<SkepticReport>,
    pub economist: Option<EconomistReport>,
    pub detective: Option<DetectiveReport>,
}

/// Per-article context threaded through the orchestrator: the article
/// itself, whatever analyst reports came back, and the accumulated
/// trace list for logging/diagnostics.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub article_url: String,
    pub article_title: String,
    pub analysis_mode: AnalysisMode,
    pub analyst_reports: AnalystReports,
    pub traces: Vec<AgentTrace>,
}

impl AgentContext {
    pub fn new(article_url: String, article_title: String, analysis_mode: AnalysisMode) -> Self {
        Self {
            article_url,
            article_title,
            analysis_mode,
            analyst_reports: AnalystReports::default(),
            traces: Vec::new(),
        }
    }

    pub fn add_trace(&mut self, trace: AgentTrace) {
        self.traces.push(trace);
    }

    pub fn total_duration(&self) -> f64 {
        self.traces.iter().map(|t| t.duration_seconds).sum()
    }

    pub fn total_tokens(&self) -> (u32, u32) {
        self.traces
            .iter()
            .fold((0, 0), |(p, c), t| (p + t.prompt_tokens, c + t.completion_tokens))
    }
}

/// One curator pick with its assigned score and written reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedPick {
    pub unit_id: String,
    pub score: f64,
    pub reason: String,
}

/// The curator's selection, handed to a renderer/sender collaborator.
/// The core neither formats HTML nor speaks SMTP — this is the full
/// egress contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub date: DateTime<Utc>,
    pub daily_summary: String,
    pub top_picks: Vec<CuratedPick>,
    pub quick_reads: Vec<CuratedPick>,
    pub total_excluded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_score_weights() {
        let unit = sample_unit();
        let expected = 8.0 * 0.30 + 6.0 * 0.25 + 4.0 * 0.20 + 9.0 * 0.25;
        assert!((unit.value_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_merge_source_dedup_by_url() {
        let mut unit = sample_unit();
        let dup = SourceReference {
            url: unit.sources[0].url.clone(),
            title: "different title".to_string(),
            source_name: "other".to_string(),
            published_at: None,
            excerpt: String::new(),
            credibility_tier: "unknown".to_string(),
        };
        unit.merge_source(dup);
        assert_eq!(unit.sources.len(), 1);
    }

    #[test]
    fn test_resolve_root_entity_exact() {
        assert_eq!(resolve_root_entity("人工智能"), "人工智能");
    }

    #[test]
    fn test_resolve_root_entity_fallback() {
        assert_eq!(resolve_root_entity("不存在的领域"), ROOT_ENTITY_FALLBACK);
    }

    #[test]
    fn test_state_change_type_rejects_invalid() {
        assert!(StateChangeType::parse("NOT_HEX").is_none());
        assert_eq!(StateChangeType::parse("TECH"), Some(StateChangeType::Tech));
    }

    fn sample_unit() -> InformationUnit {
        InformationUnit {
            id: "iu_abc".to_string(),
            fingerprint: "abc".to_string(),
            kind: InformationType::Fact,
            title: "title".to_string(),
            content: "content".to_string(),
            summary: String::new(),
            event_time: None,
            report_time: None,
            time_sensitivity: TimeSensitivity::Normal,
            analysis_content: String::new(),
            key_insights: vec![],
            analysis_depth_score: 0.5,
            information_gain: 8.0,
            actionability: 6.0,
            scarcity: 4.0,
            impact_magnitude: 9.0,
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
                url: "https://example.com/a".to_string(),
                title: "a".to_string(),
                source_name: "example".to_string(),
                published_at: None,
                excerpt: String::new(),
                credibility_tier: "unknown".to_string(),
            }],
            primary_source: "https://example.com/a".to_string(),
            extraction_confidence: 0.8,
            credibility_score: 0.5,
            importance_score: 0.5,
            sentiment: Sentiment::Neutral,
            impact_assessment: String::new(),
            related_unit_ids: vec![],
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            merged_count: 1,
            is_sent: false,
            entity_processed: false,
        }
    }
}
