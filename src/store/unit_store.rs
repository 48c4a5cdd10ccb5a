//! Persistence for `InformationUnit`s: upsert-preserving-`created_at`,
//! fingerprint/id lookup, unsent queue, and the store side of the
//! two-tier similarity search (the vector half lives in
//! [`crate::vector_index`]).

use crate::error::Result;
use crate::model::{
    EntityAnchor, InformationType, InformationUnit, Sentiment, SourceReference, StateChangeType, TimeSensitivity,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct UnitStore {
    conn: Arc<Mutex<Connection>>,
}

impl UnitStore {
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
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS information_units (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                event_time TEXT,
                report_time TEXT,
                time_sensitivity TEXT NOT NULL,
                analysis_content TEXT NOT NULL,
                key_insights TEXT NOT NULL,
                analysis_depth_score REAL NOT NULL,
                information_gain REAL NOT NULL,
                actionability REAL NOT NULL,
                scarcity REAL NOT NULL,
                impact_magnitude REAL NOT NULL,
                state_change_type TEXT,
                state_change_subtypes TEXT NOT NULL,
                entity_hierarchy TEXT NOT NULL,
                who TEXT NOT NULL,
                what TEXT NOT NULL,
                when_time TEXT NOT NULL,
                where_place TEXT NOT NULL,
                why TEXT NOT NULL,
                how TEXT NOT NULL,
                primary_source TEXT NOT NULL,
                extraction_confidence REAL NOT NULL,
                credibility_score REAL NOT NULL,
                importance_score REAL NOT NULL,
                sentiment TEXT NOT NULL,
                impact_assessment TEXT NOT NULL,
                related_unit_ids TEXT NOT NULL,
                tags TEXT NOT NULL,
                merged_count INTEGER NOT NULL,
                is_sent INTEGER NOT NULL,
                entity_processed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS source_references (
                unit_fingerprint TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                source_name TEXT NOT NULL,
                published_at TEXT,
                excerpt TEXT NOT NULL,
                credibility_tier TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_source_references_fingerprint ON source_references(unit_fingerprint)",
            [],
        )?;
        Ok(())
    }

    pub fn unit_exists(&self, fingerprint: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM information_units WHERE fingerprint = ?1", params![fingerprint], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<InformationUnit>> {
        let conn = self.conn.lock().unwrap();
        let unit = conn
            .query_row(
                "SELECT * FROM information_units WHERE fingerprint = ?1",
                params![fingerprint],
                row_to_unit,
            )
            .optional()?;
        Ok(match unit {
            Some(mut unit) => {
                unit.sources = Self::load_sources(&conn, &unit.fingerprint)?;
                Some(unit)
            }
            None => None,
        })
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<InformationUnit>> {
        let conn = self.conn.lock().unwrap();
        let unit = conn
            .query_row("SELECT * FROM information_units WHERE id = ?1", params![id], row_to_unit)
            .optional()?;
        Ok(match unit {
            Some(mut unit) => {
                unit.sources = Self::load_sources(&conn, &unit.fingerprint)?;
                Some(unit)
            }
            None => None,
        })
    }

    /// Upsert keyed on `id`. `created_at` is simply absent from the
    /// `ON CONFLICT ... DO UPDATE SET` column list below, so a conflicting
    /// row keeps whatever value it already had; `updated_at` is the only
    /// timestamp column written on every save.
    pub fn save(&self, unit: &InformationUnit) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO information_units (
                id, fingerprint, type, title, content, summary, event_time, report_time,
                time_sensitivity, analysis_content, key_insights, analysis_depth_score,
                information_gain, actionability, scarcity, impact_magnitude,
                state_change_type, state_change_subtypes, entity_hierarchy, who, what,
                when_time, where_place, why, how, primary_source, extraction_confidence,
                credibility_score, importance_score, sentiment, impact_assessment,
                related_unit_ids, tags, merged_count, is_sent, entity_processed,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                ?31, ?32, ?33, ?34, ?35, ?36, ?37
            )
            ON CONFLICT(id) DO UPDATE SET
                fingerprint=excluded.fingerprint, type=excluded.type, title=excluded.title,
                content=excluded.content, summary=excluded.summary, event_time=excluded.event_time,
                report_time=excluded.report_time, time_sensitivity=excluded.time_sensitivity,
                analysis_content=excluded.analysis_content, key_insights=excluded.key_insights,
                analysis_depth_score=excluded.analysis_depth_score, information_gain=excluded.information_gain,
                actionability=excluded.actionability, scarcity=excluded.scarcity,
                impact_magnitude=excluded.impact_magnitude, state_change_type=excluded.state_change_type,
                state_change_subtypes=excluded.state_change_subtypes, entity_hierarchy=excluded.entity_hierarchy,
                who=excluded.who, what=excluded.what, when_time=excluded.when_time,
                where_place=excluded.where_place, why=excluded.why, how=excluded.how,
                primary_source=excluded.primary_source, extraction_confidence=excluded.extraction_confidence,
                credibility_score=excluded.credibility_score, importance_score=excluded.importance_score,
                sentiment=excluded.sentiment, impact_assessment=excluded.impact_assessment,
                related_unit_ids=excluded.related_unit_ids, tags=excluded.tags,
                merged_count=excluded.merged_count, is_sent=excluded.is_sent,
                entity_processed=excluded.entity_processed, updated_at=excluded.updated_at",
            params![
                unit.id,
                unit.fingerprint,
                enum_as_bare_str(&unit.kind)?,
                unit.title,
                unit.content,
                unit.summary,
                unit.event_time,
                unit.report_time.map(|t| t.to_rfc3339()),
                enum_as_bare_str(&unit.time_sensitivity)?,
                unit.analysis_content,
                serde_json::to_string(&unit.key_insights)?,
                unit.analysis_depth_score,
                unit.information_gain,
                unit.actionability,
                unit.scarcity,
                unit.impact_magnitude,
                unit.state_change_type.map(|t| t.as_str()),
                serde_json::to_string(&unit.state_change_subtypes)?,
                serde_json::to_string(&unit.entity_hierarchy)?,
                serde_json::to_string(&unit.who)?,
                unit.what,
                unit.when,
                unit.where_,
                unit.why,
                unit.how,
                unit.primary_source,
                unit.extraction_confidence,
                unit.credibility_score,
                unit.importance_score,
                enum_as_bare_str(&unit.sentiment)?,
                unit.impact_assessment,
                serde_json::to_string(&unit.related_unit_ids)?,
                serde_json::to_string(&unit.tags)?,
                unit.merged_count,
                unit.is_sent,
                unit.entity_processed,
                unit.created_at.to_rfc3339(),
                unit.updated_at.to_rfc3339(),
            ],
        )?;

        conn.execute("DELETE FROM source_references WHERE unit_fingerprint = ?1", params![unit.fingerprint])?;
        for source in &unit.sources {
            conn.execute(
                "INSERT INTO source_references (unit_fingerprint, url, title, source_name, published_at, excerpt, credibility_tier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    unit.fingerprint,
                    source.url,
                    source.title,
                    source.source_name,
                    source.published_at.map(|t| t.to_rfc3339()),
                    source.excerpt,
                    source.credibility_tier,
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_unsent(&self, limit: usize) -> Result<Vec<InformationUnit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM information_units WHERE is_sent = 0
             ORDER BY analysis_depth_score DESC, importance_score DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_unit)?;
        let mut units = Vec::new();
        for row in rows {
            let mut unit = row?;
            unit.sources = Self::load_sources(&conn, &unit.fingerprint)?;
            units.push(unit);
        }
        Ok(units)
    }

    /// Units still awaiting an entity-graph ingestion pass, oldest first
    /// so a backfill run drains the longest-standing backlog.
    pub fn get_entity_unprocessed(&self, limit: usize) -> Result<Vec<InformationUnit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM information_units WHERE entity_processed = 0 ORDER BY created_at ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_unit)?;
        let mut units = Vec::new();
        for row in rows {
            let mut unit = row?;
            unit.sources = Self::load_sources(&conn, &unit.fingerprint)?;
            units.push(unit);
        }
        Ok(units)
    }

    pub fn mark_sent(&self, unit_ids: &[String]) -> Result<()> {
        if unit_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = unit_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE information_units SET is_sent = 1, updated_at = ?1 WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let now = Utc::now().to_rfc3339();
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&now];
        for id in unit_ids {
            bound.push(id);
        }
        stmt.execute(bound.as_slice())?;
        Ok(())
    }

    fn load_sources(conn: &Connection, fingerprint: &str) -> Result<Vec<SourceReference>> {
        let mut stmt = conn.prepare(
            "SELECT url, title, source_name, published_at, excerpt, credibility_tier
             FROM source_references WHERE unit_fingerprint = ?1",
        )?;
        let rows = stmt.query_map(params![fingerprint], |row| {
            let published_at: Option<String> = row.get(3)?;
            Ok(SourceReference {
                url: row.get(0)?,
                title: row.get(1)?,
                source_name: row.get(2)?,
                published_at: published_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
                excerpt: row.get(4)?,
                credibility_tier: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

/// Serializes a unit-variant enum (`InformationType`, `TimeSensitivity`,
/// `Sentiment`) to its bare serde string, without the surrounding JSON
/// quotes serde_json::to_string would leave in, since these are stored
/// as plain TEXT columns rather than JSON blobs.
fn enum_as_bare_str<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Inverse of [`enum_as_bare_str`]: parses a bare TEXT column value back
/// into an enum via serde by wrapping it as a JSON string value.
fn enum_from_bare_str<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

fn row_to_unit(row: &Row) -> rusqlite::Result<InformationUnit> {
    let kind_raw: String = row.get("type")?;
    let time_sensitivity_raw: String = row.get("time_sensitivity")?;
    let state_change_type_raw: Option<String> = row.get("state_change_type")?;
    let sentiment_raw: String = row.get("sentiment")?;
    let key_insights_raw: String = row.get("key_insights")?;
    let state_change_subtypes_raw: String = row.get("state_change_subtypes")?;
    let entity_hierarchy_raw: String = row.get("entity_hierarchy")?;
    let who_raw: String = row.get("who")?;
    let related_unit_ids_raw: String = row.get("related_unit_ids")?;
    let tags_raw: String = row.get("tags")?;
    let report_time_raw: Option<String> = row.get("report_time")?;
    let created_at_raw: String = row.get("created_at")?;
    let updated_at_raw: String = row.get("updated_at")?;

    let parse_list = |raw: &str| -> Vec<String> { serde_json::from_str(raw).unwrap_or_default() };

    Ok(InformationUnit {
        id: row.get("id")?,
        fingerprint: row.get("fingerprint")?,
        kind: enum_from_bare_str(&kind_raw).unwrap_or(InformationType::Fact),
        title: row.get("title")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        event_time: row.get("event_time")?,
        report_time: report_time_raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        time_sensitivity: enum_from_bare_str(&time_sensitivity_raw).unwrap_or(TimeSensitivity::Normal),
        analysis_content: row.get("analysis_content")?,
        key_insights: parse_list(&key_insights_raw),
        analysis_depth_score: row.get("analysis_depth_score")?,
        information_gain: row.get("information_gain")?,
        actionability: row.get("actionability")?,
        scarcity: row.get("scarcity")?,
        impact_magnitude: row.get("impact_magnitude")?,
        state_change_type: state_change_type_raw.as_deref().and_then(StateChangeType::parse),
        state_change_subtypes: parse_list(&state_change_subtypes_raw),
        entity_hierarchy: serde_json::from_str::<Vec<EntityAnchor>>(&entity_hierarchy_raw).unwrap_or_default(),
        who: parse_list(&who_raw),
        what: row.get("what")?,
        when: row.get("when_time")?,
        where_: row.get("where_place")?,
        why: row.get("why")?,
        how: row.get("how")?,
        sources: Vec::new(),
        primary_source: row.get("primary_source")?,
        extraction_confidence: row.get("extraction_confidence")?,
        credibility_score: row.get("credibility_score")?,
        importance_score: row.get("importance_score")?,
        sentiment: enum_from_bare_str(&sentiment_raw).unwrap_or(Sentiment::Neutral),
        impact_assessment: row.get("impact_assessment")?,
        related_unit_ids: parse_list(&related_unit_ids_raw),
        tags: parse_list(&tags_raw),
        created_at: DateTime::parse_from_rfc3339(&created_at_raw).unwrap().with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at_raw).unwrap().with_timezone(&Utc),
        merged_count: row.get("merged_count")?,
        is_sent: row.get("is_sent")?,
        entity_processed: row.get("entity_processed")?,
    })
}
