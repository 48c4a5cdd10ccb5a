//! Entity Graph persistence: entities, aliases, mentions, and relations,
//! plus the extraction-ingest pipeline that turns one article's
//! `ExtractedEntity`/`ExtractedRelation` output into durable rows.

use crate::error::Result;
use crate::model::{
    Entity, EntityMention, EntityRelation, EntityType, ExtractedEntity, ExtractedRelation, RelationDirection,
    RelationType, Trend,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct HotEntity {
    pub entity: Entity,
    pub recent_count: i64,
    pub previous_count: i64,
    pub trend: Trend,
    pub change_pct: f64,
}

pub struct EntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl EntityStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                canonical_name TEXT NOT NULL,
                type TEXT NOT NULL,
                l3_root TEXT NOT NULL,
                l2_sector TEXT NOT NULL,
                mention_count INTEGER NOT NULL DEFAULT 0,
                first_mentioned TEXT,
                last_mentioned TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entity_aliases (
                alias TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_aliases_entity ON entity_aliases(entity_id)", [])?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entity_mentions (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                unit_id TEXT NOT NULL,
                role TEXT NOT NULL,
                sentiment TEXT NOT NULL,
                state_dimension TEXT,
                state_delta TEXT,
                event_time TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_mentions_entity ON entity_mentions(entity_id)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_mentions_unit ON entity_mentions(unit_id)", [])?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entity_relations (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                strength REAL NOT NULL,
                confidence REAL NOT NULL,
                evidence_unit_ids TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_relations_source ON entity_relations(source_id)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_relations_target ON entity_relations(target_id)", [])?;
        Ok(())
    }

    pub fn register_entity(&self, entity: &Entity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO entities
                (id, canonical_name, type, l3_root, l2_sector, mention_count, first_mentioned, last_mentioned, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entity.id,
                entity.canonical_name,
                entity_type_str(entity.entity_type),
                entity.l3_root,
                entity.l2_sector,
                entity.mention_count as i64,
                entity.first_mentioned.map(|t| t.to_rfc3339()),
                entity.last_mentioned.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        let entity = conn
            .query_row(
                "SELECT id, canonical_name, type, l3_root, l2_sector, mention_count, first_mentioned, last_mentioned
                 FROM entities WHERE id = ?1",
                params![entity_id],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    pub fn get_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        match self.resolve_alias(name)? {
            Some(id) => self.get_entity(&id),
            None => Ok(None),
        }
    }

    pub fn add_alias(&self, alias: &str, entity_id: &str, is_primary: bool) -> Result<()> {
        let normalized = alias.trim().to_lowercase();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO entity_aliases (alias, entity_id, is_primary) VALUES (?1, ?2, ?3)",
            params![normalized, entity_id, is_primary],
        )?;
        Ok(())
    }

    /// Resolves an alias to an entity id: exact match first, then a
    /// `LIKE %alias%` substring fallback. The fallback can overmatch on
    /// short names; accepted here as the upstream tradeoff.
    pub fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        let normalized = alias.trim().to_lowercase();
        let conn = self.conn.lock().unwrap();
        let exact: Option<String> = conn
            .query_row("SELECT entity_id FROM entity_aliases WHERE alias = ?1", params![normalized], |row| row.get(0))
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
        let pattern = format!("%{normalized}%");
        let fuzzy: Option<String> = conn
            .query_row(
                "SELECT entity_id FROM entity_aliases WHERE alias LIKE ?1 LIMIT 1",
                params![pattern],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fuzzy)
    }

    pub fn record_mention(&self, mention: &EntityMention) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO entity_mentions
                (id, entity_id, unit_id, role, sentiment, state_dimension, state_delta, event_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                mention.entity_id,
                mention.unit_id,
                serde_json::to_value(mention.role.clone())?.as_str().unwrap_or("主角"),
                serde_json::to_value(mention.sentiment)?.as_str().unwrap_or("neutral"),
                mention.state_dimension.map(|d| d.as_str()),
                mention.state_delta,
                mention.event_time,
                now,
            ],
        )?;
        conn.execute(
            "UPDATE entities SET
                mention_count = mention_count + 1,
                last_mentioned = ?1,
                first_mentioned = COALESCE(first_mentioned, ?1)
             WHERE id = ?2",
            params![now, mention.entity_id],
        )?;
        Ok(())
    }

    /// Inserts a relation, or merges it into an existing
    /// `(source, target, relation_type)` row by unioning
    /// `evidence_unit_ids` and overwriting strength/confidence with the
    /// new values — matching the ingest behavior this is grounded on.
    pub fn add_relation(&self, relation: &EntityRelation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT id, evidence_unit_ids FROM entity_relations
                 WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                params![relation.source_id, relation.target_id, relation.relation_type.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, evidence_json)) => {
                let mut evidence: HashSet<String> = serde_json::from_str(&evidence_json).unwrap_or_default();
                evidence.extend(relation.evidence_unit_ids.iter().cloned());
                let merged: Vec<String> = evidence.into_iter().collect();
                conn.execute(
                    "UPDATE entity_relations SET evidence_unit_ids = ?1, strength = ?2, confidence = ?3 WHERE id = ?4",
                    params![serde_json::to_string(&merged)?, relation.strength, relation.confidence, id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO entity_relations
                        (id, source_id, target_id, relation_type, strength, confidence, evidence_unit_ids, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        Uuid::new_v4().to_string(),
                        relation.source_id,
                        relation.target_id,
                        relation.relation_type.as_str(),
                        relation.strength,
                        relation.confidence,
                        serde_json::to_string(&relation.evidence_unit_ids)?,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn get_relations(&self, entity_id: &str, direction: RelationDirection) -> Result<Vec<EntityRelation>> {
        let conn = self.conn.lock().unwrap();
        let sql = match direction {
            RelationDirection::Outgoing => "SELECT * FROM entity_relations WHERE source_id = ?1",
            RelationDirection::Incoming => "SELECT * FROM entity_relations WHERE target_id = ?1",
            RelationDirection::Both => "SELECT * FROM entity_relations WHERE source_id = ?1 OR target_id = ?1",
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![entity_id], row_to_relation)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Ingests one article's extraction output: resolves or creates each
    /// entity, records a mention for it, then resolves and upserts each
    /// relation. Returns the name→id map so callers can cross-reference.
    pub fn process_extracted(
        &self,
        unit_id: &str,
        entities: &[ExtractedEntity],
        relations: &[ExtractedRelation],
        event_time: Option<&str>,
    ) -> Result<HashMap<String, String>> {
        let mut entity_id_map = HashMap::new();

        for ext in entities {
            let entity_id = match self.resolve_alias(&ext.name)? {
                Some(id) => id,
                None => {
                    let entity = Entity {
                        id: Uuid::new_v4().to_string(),
                        canonical_name: ext.name.clone(),
                        entity_type: ext.entity_type,
                        l3_root: ext.l3_root.clone(),
                        l2_sector: ext.l2_sector.clone(),
                        mention_count: 0,
                        first_mentioned: None,
                        last_mentioned: None,
                    };
                    self.register_entity(&entity)?;
                    self.add_alias(&ext.name, &entity.id, true)?;
                    for alias in &ext.aliases {
                        self.add_alias(alias, &entity.id, false)?;
                    }
                    entity.id
                }
            };
            entity_id_map.insert(ext.name.clone(), entity_id.clone());

            self.record_mention(&EntityMention {
                entity_id,
                unit_id: unit_id.to_string(),
                role: ext.role.clone(),
                sentiment: ext.sentiment,
                state_dimension: ext.state_change.as_ref().map(|s| s.dimension),
                state_delta: ext.state_change.as_ref().map(|s| s.delta.clone()),
                event_time: event_time.map(|s| s.to_string()),
            })?;
        }

        for ext_rel in relations {
            let source_id = entity_id_map
                .get(&ext_rel.source_name)
                .cloned()
                .or(self.resolve_alias(&ext_rel.source_name)?);
            let target_id = entity_id_map
                .get(&ext_rel.target_name)
                .cloned()
                .or(self.resolve_alias(&ext_rel.target_name)?);

            if let (Some(source_id), Some(target_id)) = (source_id, target_id) {
                if let Some(relation_type) = RelationType::parse(&ext_rel.relation_type) {
                    self.add_relation(&EntityRelation {
                        source_id,
                        target_id,
                        relation_type,
                        strength: ext_rel.strength,
                        confidence: ext_rel.confidence,
                        evidence_unit_ids: vec![unit_id.to_string()],
                    })?;
                }
            }
        }

        Ok(entity_id_map)
    }

    /// Hot entities over the trailing `days`-day window, with trend
    /// against the preceding window of equal length: >20% swing is
    /// up/down, otherwise stable, and a previously-silent entity with
    /// any recent mentions is "new".
    pub fn get_hot_entities(&self, days: i64, limit: usize) -> Result<Vec<HotEntity>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let recent_start = now - Duration::days(days);
        let previous_start = now - Duration::days(days * 2);

        let mut stmt = conn.prepare(
            "SELECT e.id, COUNT(m.id) as recent_count
             FROM entities e JOIN entity_mentions m ON e.id = m.entity_id
             WHERE m.created_at >= ?1
             GROUP BY e.id ORDER BY recent_count DESC LIMIT ?2",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map(params![recent_start.to_rfc3339(), limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut hot = Vec::with_capacity(rows.len());
        for (entity_id, recent_count) in rows {
            let previous_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entity_mentions WHERE entity_id = ?1 AND created_at >= ?2 AND created_at < ?3",
                params![entity_id, previous_start.to_rfc3339(), recent_start.to_rfc3339()],
                |row| row.get(0),
            )?;

            let (trend, change_pct) = if previous_count == 0 {
                if recent_count > 0 {
                    (Trend::New, 100.0)
                } else {
                    (Trend::Stable, 0.0)
                }
            } else {
                let pct = ((recent_count - previous_count) as f64 / previous_count as f64) * 100.0;
                let trend = if pct > 20.0 {
                    Trend::Up
                } else if pct < -20.0 {
                    Trend::Down
                } else {
                    Trend::Stable
                };
                (trend, pct)
            };

            let entity = conn
                .query_row(
                    "SELECT id, canonical_name, type, l3_root, l2_sector, mention_count, first_mentioned, last_mentioned
                     FROM entities WHERE id = ?1",
                    params![entity_id],
                    row_to_entity,
                )
                .optional()?;
            if let Some(entity) = entity {
                hot.push(HotEntity { entity, recent_count, previous_count, trend, change_pct });
            }
        }
        Ok(hot)
    }
}

fn entity_type_str(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Company => "COMPANY",
        EntityType::Person => "PERSON",
        EntityType::Product => "PRODUCT",
        EntityType::Org => "ORG",
        EntityType::Concept => "CONCEPT",
        EntityType::Location => "LOCATION",
        EntityType::Event => "EVENT",
    }
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let type_raw: String = row.get(2)?;
    let first_mentioned: Option<String> = row.get(6)?;
    let last_mentioned: Option<String> = row.get(7)?;
    Ok(Entity {
        id: row.get(0)?,
        canonical_name: row.get(1)?,
        entity_type: EntityType::parse_or_default(&type_raw),
        l3_root: row.get(3)?,
        l2_sector: row.get(4)?,
        mention_count: row.get::<_, i64>(5)? as u64,
        first_mentioned: first_mentioned.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        last_mentioned: last_mentioned.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
    })
}

fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<EntityRelation> {
    let relation_type_raw: String = row.get("relation_type")?;
    let evidence_raw: String = row.get("evidence_unit_ids")?;
    Ok(EntityRelation {
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relation_type: RelationType::parse(&relation_type_raw).unwrap_or(RelationType::Peer),
        strength: row.get("strength")?,
        confidence: row.get("confidence")?,
        evidence_unit_ids: serde_json::from_str(&evidence_raw).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityRole;

    fn sample_extracted(name: &str, aliases: Vec<&str>) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            aliases: aliases.into_iter().map(|s| s.to_string()).collect(),
            entity_type: EntityType::Company,
            l3_root: "人工智能".to_string(),
            l2_sector: "大模型".to_string(),
            role: EntityRole::Protagonist,
            sentiment: crate::model::Sentiment::Neutral,
            state_change: None,
        }
    }

    #[test]
    fn test_process_extracted_creates_entity_and_mention() {
        let store = EntityStore::new_in_memory().unwrap();
        let map = store
            .process_extracted("iu_1", &[sample_extracted("甲骨文", vec!["Oracle"])], &[], None)
            .unwrap();
        let entity_id = map.get("甲骨文").unwrap();

        let entity = store.get_entity(entity_id).unwrap().unwrap();
        assert_eq!(entity.canonical_name, "甲骨文");
        assert_eq!(entity.mention_count, 1);
    }

    #[test]
    fn test_resolve_alias_exact_then_fuzzy() {
        let store = EntityStore::new_in_memory().unwrap();
        store.process_extracted("iu_1", &[sample_extracted("甲骨文", vec!["Oracle"])], &[], None).unwrap();

        assert!(store.resolve_alias("oracle").unwrap().is_some());
        assert!(store.resolve_alias("orac").unwrap().is_some());
        assert!(store.resolve_alias("completely unrelated").unwrap().is_none());
    }

    #[test]
    fn test_add_relation_merges_evidence_and_overwrites_strength() {
        let store = EntityStore::new_in_memory().unwrap();
        let relation = EntityRelation {
            source_id: "e1".to_string(),
            target_id: "e2".to_string(),
            relation_type: RelationType::Partner,
            strength: 1.0,
            confidence: 0.8,
            evidence_unit_ids: vec!["iu_1".to_string()],
        };
        store.add_relation(&relation).unwrap();

        let second = EntityRelation {
            evidence_unit_ids: vec!["iu_2".to_string()],
            strength: 0.5,
            ..relation
        };
        store.add_relation(&second).unwrap();

        let relations = store.get_relations("e1", RelationDirection::Outgoing).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].strength, 0.5);
        assert_eq!(relations[0].evidence_unit_ids.len(), 2);
    }

    #[test]
    fn test_process_extracted_links_relation_by_name() {
        let store = EntityStore::new_in_memory().unwrap();
        let relation = ExtractedRelation {
            source_name: "甲骨文".to_string(),
            target_name: "谷歌".to_string(),
            relation_type: "competitor".to_string(),
            strength: 1.0,
            confidence: 0.8,
        };
        store
            .process_extracted(
                "iu_1",
                &[sample_extracted("甲骨文", vec![]), sample_extracted("谷歌", vec![])],
                &[relation],
                None,
            )
            .unwrap();

        let relations = store.get_relations(&store.resolve_alias("甲骨文").unwrap().unwrap(), RelationDirection::Outgoing).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, RelationType::Competitor);
    }

    /// Backdates mentions directly through the connection since
    /// `record_mention` always stamps `created_at = now` — the only way
    /// to exercise the two-window trend comparison is from inside this
    /// module, which still has access to the private `conn` field.
    #[test]
    fn test_get_hot_entities_reports_up_trend_across_windows() {
        let store = EntityStore::new_in_memory().unwrap();
        let map = store.process_extracted("iu_seed", &[sample_extracted("甲骨文", vec![])], &[], None).unwrap();
        let entity_id = map.get("甲骨文").unwrap().clone();

        let now = Utc::now();
        let recent_ts = (now - Duration::days(1)).to_rfc3339();
        let previous_ts = (now - Duration::days(9)).to_rfc3339();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("DELETE FROM entity_mentions WHERE entity_id = ?1", params![entity_id]).unwrap();
            for i in 0..10 {
                conn.execute(
                    "INSERT INTO entity_mentions (id, entity_id, unit_id, role, sentiment, state_dimension, state_delta, event_time, created_at)
                     VALUES (?1, ?2, ?3, '主角', 'neutral', NULL, NULL, NULL, ?4)",
                    params![format!("recent_{i}"), entity_id, format!("iu_r{i}"), recent_ts],
                )
                .unwrap();
            }
            for i in 0..2 {
                conn.execute(
                    "INSERT INTO entity_mentions (id, entity_id, unit_id, role, sentiment, state_dimension, state_delta, event_time, created_at)
                     VALUES (?1, ?2, ?3, '主角', 'neutral', NULL, NULL, NULL, ?4)",
                    params![format!("previous_{i}"), entity_id, format!("iu_p{i}"), previous_ts],
                )
                .unwrap();
            }
        }

        let hot = store.get_hot_entities(7, 10).unwrap();
        let entry = hot.iter().find(|h| h.entity.id == entity_id).unwrap();
        assert_eq!(entry.recent_count, 10);
        assert_eq!(entry.previous_count, 2);
        assert_eq!(entry.trend, Trend::Up);
        assert!((entry.change_pct - 400.0).abs() < 1e-9);
    }
}
