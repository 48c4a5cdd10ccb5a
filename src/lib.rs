//! Information-Unit Pipeline
//!
//! Turns a stream of RSS/Atom articles into deduplicated, scored, entity-linked
//! "information units": content-addressed fingerprinting catches exact repeats,
//! a vector index catches near-duplicates, a multi-agent LLM pipeline extracts
//! and merges candidates, and an entity graph tracks who/what is changing and
//! how that's trending over time.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Information-Unit Pipeline                    │
//! ├──────────────┬──────────────┬──────────────┬──────────────────────┤
//! │  LLM Gateway │  Vector Index│  Unit Store  │  Entity Store        │
//! │ (llm::gateway│ (vector_index│(store::unit_ │ (store::entity_store)│
//! │  ::embedding)│     )        │  store)      │                       │
//! ├──────────────┴──────────────┴──────────────┴──────────────────────┤
//! │  Agents: extractor → merger → analysts (deep mode) → curator      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │               Orchestrator (per-article fan-out)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │               Scheduler (run_cycle / send_digest / backfill)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ambient concerns (config, telemetry, error handling) sit beside the
//! pipeline stages rather than inside them, so each stage stays testable in
//! isolation.

pub mod error;
pub mod config;
pub mod model;
pub mod fingerprint;
pub mod similarity;
pub mod telemetry;

pub mod llm;
pub mod vector_index;

pub mod store;
pub mod agents;

pub mod orchestrator;
pub mod scheduler;

pub use error::{Error, Result};
pub use config::PipelineConfig;

pub use model::{
    resolve_root_entity, AgentContext, AgentOutput, AgentTrace, AnalysisMode, Article, CuratedPick,
    Digest, Entity, EntityAlias, EntityAnchor, EntityMention, EntityRelation, EntityRole, EntityType,
    ExtractedEntity, ExtractedRelation, InformationType, InformationUnit, RelationType, Sentiment,
    SourceReference, StateChangeType, TimeSensitivity, Trend, ROOT_ENTITIES, ROOT_ENTITY_FALLBACK,
};

pub use fingerprint::{fingerprint, unit_id};
pub use similarity::{cosine_similarity, ratcliff_obershelp};

pub use telemetry::{AiCallRecord, Telemetry};

pub use llm::embedding::EmbeddingService;
pub use llm::gateway::{ChatMessage, ChatRole, LlmGateway};

pub use vector_index::{IndexBackend, IndexStats, SearchHit, SqliteVectorIndex, VectorRecord};

pub use store::entity_store::{EntityStore, HotEntity};
pub use store::unit_store::UnitStore;

pub use agents::analysts::{Detective, Economist, Skeptic};
pub use agents::curator::Curator;
pub use agents::extractor::{ExtractionCandidate, Extractor};
pub use agents::merger::Merger;

pub use orchestrator::Orchestrator;
pub use scheduler::{DigestSink, Scheduler};

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Returns the library version as a semantic version string.
pub fn version() -> String {
    format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        assert_eq!(version(), "0.1.0");
    }
}
