use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::configure_connection;
use crate::error::{CalibrationError, EngineResult};
use crate::model::RangeBounds;
use crate::util::ensure_parent_directory;

pub const RELEASED_STATUS: &str = "RELEASED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub campaign_id: String,
    pub score: f64,
    #[serde(default = "default_status")]
    pub status: String,
    pub released_at: DateTime<Utc>,
    #[serde(default)]
    pub dispute_status: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub external_ticket_ref: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

fn default_status() -> String {
    RELEASED_STATUS.to_string()
}

#[derive(Debug, Clone)]
pub struct ArchiveQuery {
    pub campaign_id: String,
    pub status: &'static str,
    pub released_after: DateTime<Utc>,
    pub score_range: Option<RangeBounds>,
    pub exclude_ids: Vec<String>,
    pub limit: usize,
}

impl ArchiveQuery {
    pub fn released_pool(
        campaign_id: &str,
        released_after: DateTime<Utc>,
        limit: usize,
    ) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            status: RELEASED_STATUS,
            released_after,
            score_range: None,
            exclude_ids: Vec::new(),
            limit,
        }
    }

    pub fn in_range(mut self, bounds: RangeBounds) -> Self {
        self.score_range = Some(bounds);
        self
    }

    pub fn excluding(mut self, ids: Vec<String>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn matches(&self, record: &ArchiveRecord) -> bool {
        record.campaign_id == self.campaign_id
            && record.status == self.status
            && record.released_at >= self.released_after
            && record.dispute_status.is_none()
            && self
                .score_range
                .is_none_or(|bounds| bounds.contains(record.score))
            && !self.exclude_ids.iter().any(|id| id == &record.id)
    }
}

pub trait HistoricalArchive {
    fn query(&self, query: &ArchiveQuery) -> EngineResult<Vec<ArchiveRecord>>;
}

pub struct SqliteArchive {
    connection: Connection,
}

impl SqliteArchive {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open archive {}", path.display()))?;
        configure_connection(&connection)?;
        let archive = Self { connection };
        archive.ensure_schema()?;
        Ok(archive)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let archive = Self {
            connection: Connection::open_in_memory()?,
        };
        archive.ensure_schema()?;
        Ok(archive)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.connection
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS archive_records (
              id TEXT PRIMARY KEY,
              campaign_id TEXT NOT NULL,
              score REAL NOT NULL,
              status TEXT NOT NULL,
              released_at_epoch INTEGER NOT NULL,
              dispute_status TEXT,
              agent_name TEXT,
              external_ticket_ref TEXT,
              metadata_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_archive_pool
              ON archive_records(campaign_id, status, released_at_epoch);
            ",
            )
            .context("failed to create archive_records table")?;
        Ok(())
    }

    pub fn import(&mut self, records: &[ArchiveRecord]) -> Result<usize> {
        let tx = self.connection.transaction()?;
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO archive_records(
                  id, campaign_id, score, status, released_at_epoch, dispute_status,
                  agent_name, external_ticket_ref, metadata_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                  campaign_id=excluded.campaign_id,
                  score=excluded.score,
                  status=excluded.status,
                  released_at_epoch=excluded.released_at_epoch,
                  dispute_status=excluded.dispute_status,
                  agent_name=excluded.agent_name,
                  external_ticket_ref=excluded.external_ticket_ref,
                  metadata_json=excluded.metadata_json
                ",
            )?;

            for record in records {
                let metadata = serde_json::to_string(&record.metadata)
                    .with_context(|| format!("failed to encode metadata for {}", record.id))?;
                statement.execute(params![
                    record.id,
                    record.campaign_id,
                    record.score,
                    record.status,
                    record.released_at.timestamp(),
                    record.dispute_status,
                    record.agent_name,
                    record.external_ticket_ref,
                    metadata,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }
}

impl HistoricalArchive for SqliteArchive {
    fn query(&self, query: &ArchiveQuery) -> EngineResult<Vec<ArchiveRecord>> {
        let (min_score, max_score) = query
            .score_range
            .map(|bounds| (bounds.min, bounds.max))
            .unwrap_or((f64::MIN, f64::MAX));
        // Exclusions are applied after the fetch; widen the window by their
        // count so `limit` rows can still be filled.
        let fetch_limit = (query.limit + query.exclude_ids.len()) as i64;

        let mut statement = self.connection.prepare(
            "
            SELECT id, campaign_id, score, status, released_at_epoch, dispute_status,
                   agent_name, external_ticket_ref, metadata_json
            FROM archive_records
            WHERE campaign_id = ?1
              AND status = ?2
              AND released_at_epoch >= ?3
              AND dispute_status IS NULL
              AND score >= ?4 AND score <= ?5
            ORDER BY released_at_epoch DESC, id ASC
            LIMIT ?6
            ",
        )?;

        let mut rows = statement.query(params![
            query.campaign_id,
            query.status,
            query.released_after.timestamp(),
            min_score,
            max_score,
            fetch_limit,
        ])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let epoch: i64 = row.get(4)?;
            let released_at = DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
                CalibrationError::InvalidInput(format!(
                    "archive record {id} has invalid release time {epoch}"
                ))
            })?;
            let metadata_json: String = row.get(8)?;

            let record = ArchiveRecord {
                id,
                campaign_id: row.get(1)?,
                score: row.get(2)?,
                status: row.get(3)?,
                released_at,
                dispute_status: row.get(5)?,
                agent_name: row.get(6)?,
                external_ticket_ref: row.get(7)?,
                metadata: serde_json::from_str(&metadata_json)?,
            };
            if !query.matches(&record) {
                continue;
            }
            out.push(record);
            if out.len() == query.limit {
                break;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    records: Vec<ArchiveRecord>,
}

#[cfg(test)]
impl MemoryArchive {
    pub fn new(records: Vec<ArchiveRecord>) -> Self {
        Self { records }
    }
}

#[cfg(test)]
impl HistoricalArchive for MemoryArchive {
    fn query(&self, query: &ArchiveQuery) -> EngineResult<Vec<ArchiveRecord>> {
        let mut matches = self
            .records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| b.released_at.cmp(&a.released_at).then(a.id.cmp(&b.id)));
        matches.truncate(query.limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn record(id: &str, score: f64, days_ago: i64) -> ArchiveRecord {
        ArchiveRecord {
            id: id.to_string(),
            campaign_id: "camp-1".to_string(),
            score,
            status: RELEASED_STATUS.to_string(),
            released_at: Utc::now() - Duration::days(days_ago),
            dispute_status: None,
            agent_name: Some(format!("agent-{id}")),
            external_ticket_ref: Some(format!("T-{id}")),
            metadata: json!({ "channel": "voice" }),
        }
    }

    fn fixture() -> Vec<ArchiveRecord> {
        let mut disputed = record("disputed", 80.0, 2);
        disputed.dispute_status = Some("OPEN".to_string());
        let mut draft = record("draft", 80.0, 2);
        draft.status = "DRAFT".to_string();
        let mut other_campaign = record("other", 80.0, 2);
        other_campaign.campaign_id = "camp-2".to_string();

        vec![
            record("a", 95.0, 1),
            record("b", 75.0, 3),
            record("c", 40.0, 5),
            record("stale", 90.0, 45),
            disputed,
            draft,
            other_campaign,
        ]
    }

    fn pool_query() -> ArchiveQuery {
        ArchiveQuery::released_pool("camp-1", Utc::now() - Duration::days(30), 100)
    }

    #[test]
    fn memory_archive_filters_status_dispute_campaign_and_age() {
        let archive = MemoryArchive::new(fixture());
        let ids = archive
            .query(&pool_query())
            .expect("query should succeed")
            .into_iter()
            .map(|record| record.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn sqlite_archive_matches_memory_archive_semantics() {
        let mut sqlite = SqliteArchive::open_in_memory().expect("archive should open");
        sqlite.import(&fixture()).expect("import should succeed");
        let memory = MemoryArchive::new(fixture());

        let query = pool_query()
            .in_range(RangeBounds::new(70.0, 100.0))
            .excluding(vec!["a".to_string()]);
        let from_sqlite = sqlite.query(&query).expect("sqlite query");
        let from_memory = memory.query(&query).expect("memory query");

        assert_eq!(from_sqlite.len(), 1);
        assert_eq!(from_sqlite[0].id, "b");
        assert_eq!(from_memory[0].id, from_sqlite[0].id);
        assert_eq!(from_sqlite[0].metadata, json!({ "channel": "voice" }));
    }

    #[test]
    fn limit_is_applied_after_exclusions() {
        let mut sqlite = SqliteArchive::open_in_memory().expect("archive should open");
        sqlite.import(&fixture()).expect("import should succeed");

        let mut query = pool_query().excluding(vec!["a".to_string()]);
        query.limit = 2;
        let ids = sqlite
            .query(&query)
            .expect("query should succeed")
            .into_iter()
            .map(|record| record.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn reimport_overwrites_existing_records() {
        let mut sqlite = SqliteArchive::open_in_memory().expect("archive should open");
        sqlite.import(&fixture()).expect("first import");
        let mut updated = record("a", 10.0, 1);
        updated.dispute_status = Some("OPEN".to_string());
        sqlite.import(&[updated]).expect("second import");

        let ids = sqlite
            .query(&pool_query())
            .expect("query should succeed")
            .into_iter()
            .map(|record| record.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
