//! Scheduler: the four control-surface verbs sitting on top of the
//! Orchestrator/Curator — `run_cycle`, `send_digest`, `reprocess`, and
//! `backfill_entities`. Fetching articles and rendering/delivering a
//! digest are both out of this crate's scope; callers supply already-
//! fetched [`Article`]s and a [`DigestSink`] to receive the result.

use crate::agents::extractor::Extractor;
use crate::error::Result;
use crate::model::{AgentContext, AnalysisMode, Article, Digest, SourceReference};
use crate::orchestrator::Orchestrator;
use crate::store::entity_store::EntityStore;
use crate::store::unit_store::UnitStore;
use crate::Curator;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Mutex as AsyncMutex};

/// How many unsent units `send_digest` pulls from the store before
/// handing them to the Curator. Generous relative to a single day's
/// output; the Curator's own caps do the real narrowing.
const DIGEST_CANDIDATE_LIMIT: usize = 200;

/// Backlog drained per `backfill_entities` call.
const BACKFILL_BATCH_LIMIT: usize = 100;

/// The out-of-scope renderer/delivery collaborator (email, web, Slack...).
/// `send_digest` hands it a finished [`Digest`] and awaits only the
/// hand-off, not delivery confirmation.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<()>;
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    unit_store: Arc<UnitStore>,
    entity_store: Arc<EntityStore>,
    curator: Arc<Curator>,
    entity_extractor: Arc<Extractor>,
    sink: Arc<dyn DigestSink>,
    /// Gates `send_digest` against a concurrently running `run_cycle`:
    /// both read/write `information_units` and the digest must see a
    /// consistent snapshot. `reprocess`/`backfill_entities` share the
    /// gate too since they also mutate the store.
    cycle_gate: AsyncMutex<()>,
    /// Articles that yielded zero derived units (or failed outright),
    /// keyed by URL, so `reprocess` can retry without needing its own
    /// fetch capability.
    zero_yield: Mutex<HashMap<String, Article>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        unit_store: Arc<UnitStore>,
        entity_store: Arc<EntityStore>,
        curator: Arc<Curator>,
        entity_extractor: Arc<Extractor>,
        sink: Arc<dyn DigestSink>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            orchestrator,
            unit_store,
            entity_store,
            curator,
            entity_extractor,
            sink,
            cycle_gate: AsyncMutex::new(()),
            zero_yield: Mutex::new(HashMap::new()),
            stop_tx,
            stop_rx,
        }
    }

    /// Signals every in-flight and future `run_cycle`/`reprocess` loop to
    /// stop at the next article boundary. Never interrupts a call
    /// mid-flight — this is best-effort graceful shutdown, not cancellation.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn should_stop(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Drives the Orchestrator over a batch of already-fetched articles.
    /// Returns the ids of every unit (merged or novel) produced. Articles
    /// that end up with zero derived units, or that fail outright, are
    /// recorded for a later `reprocess` pass rather than dropped.
    pub async fn run_cycle(&self, articles: &[Article], mode: AnalysisMode) -> Result<Vec<String>> {
        let _gate = self.cycle_gate.lock().await;
        let mut produced = Vec::new();

        for article in articles {
            if self.should_stop() {
                break;
            }
            match self.orchestrator.process_article(article, mode).await {
                Ok(units) if units.is_empty() => {
                    self.zero_yield.lock().unwrap().insert(article.url.clone(), article.clone());
                }
                Ok(units) => {
                    self.zero_yield.lock().unwrap().remove(&article.url);
                    produced.extend(units.into_iter().map(|u| u.id));
                }
                Err(err) => {
                    tracing::warn!(event = "article_analysis_failed", url = %article.url, error = %err);
                    self.zero_yield.lock().unwrap().insert(article.url.clone(), article.clone());
                }
            }
        }
        Ok(produced)
    }

    /// Re-runs extraction-through-ingest for every article currently
    /// tracked as zero-yield. A successful pass removes it from the
    /// backlog (via `run_cycle`'s own bookkeeping); a repeat failure
    /// leaves it there for the next call.
    pub async fn reprocess(&self, mode: AnalysisMode) -> Result<Vec<String>> {
        let candidates: Vec<Article> = self.zero_yield.lock().unwrap().values().cloned().collect();
        self.run_cycle(&candidates, mode).await
    }

    /// Curates the unsent backlog into a `Digest`, hands it to the sink,
    /// and marks every picked unit sent. Gated against `run_cycle` so the
    /// Curator never sees a store mid-write.
    pub async fn send_digest(&self) -> Result<Digest> {
        let _gate = self.cycle_gate.lock().await;
        let unsent = self.unit_store.get_unsent(DIGEST_CANDIDATE_LIMIT)?;
        let (result, _trace) = self.curator.curate(&unsent).await;

        let digest = Digest {
            date: Utc::now(),
            daily_summary: result.daily_summary,
            top_picks: result.top_picks,
            quick_reads: result.quick_reads,
            total_excluded: result.total_excluded,
        };

        self.sink.send(&digest).await?;

        let sent_ids: Vec<String> = digest
            .top_picks
            .iter()
            .chain(digest.quick_reads.iter())
            .map(|p| p.unit_id.clone())
            .collect();
        self.unit_store.mark_sent(&sent_ids)?;

        Ok(digest)
    }

    /// Drains up to [`BACKFILL_BATCH_LIMIT`] units still missing entity
    /// ingestion: re-runs a lightweight extraction pass over the unit's
    /// own title/content to recover its entities/relations, ingests
    /// them, and flips `entity_processed`.
    pub async fn backfill_entities(&self) -> Result<usize> {
        let _gate = self.cycle_gate.lock().await;
        let backlog = self.unit_store.get_entity_unprocessed(BACKFILL_BATCH_LIMIT)?;
        let mut backfilled = 0;

        for mut unit in backlog {
            if self.should_stop() {
                break;
            }
            let source = unit
                .sources
                .first()
                .cloned()
                .unwrap_or_else(|| SourceReference {
                    url: unit.primary_source.clone(),
                    title: unit.title.clone(),
                    source_name: String::new(),
                    published_at: None,
                    excerpt: String::new(),
                    credibility_tier: "unknown".to_string(),
                });
            let context = AgentContext::new(source.url.clone(), unit.title.clone(), AnalysisMode::Quick);

            let extraction = self.entity_extractor.process(&unit.title, &unit.content, &source, &context).await;
            if let Some(candidates) = extraction.data {
                let mut entities = Vec::new();
                let mut relations = Vec::new();
                for candidate in candidates {
                    entities.extend(candidate.entities);
                    relations.extend(candidate.relations);
                }
                self.entity_store.process_extracted(&unit.id, &entities, &relations, unit.event_time.as_deref())?;
            }

            unit.entity_processed = true;
            self.unit_store.save(&unit)?;
            backfilled += 1;
        }
        Ok(backfilled)
    }
}
