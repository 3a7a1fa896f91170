use anyhow::{Context, Result};
use rusqlite::Connection;

use super::DB_SCHEMA_VERSION;
use crate::util::now_utc_string;

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS calibration_sessions (
          id TEXT PRIMARY KEY,
          campaign_id TEXT NOT NULL,
          title TEXT NOT NULL,
          description TEXT,
          scheduled_at TEXT NOT NULL,
          status TEXT NOT NULL,
          reproducibility_ticket_count INTEGER NOT NULL,
          repeatability_ticket_count INTEGER NOT NULL,
          high_min REAL NOT NULL,
          high_max REAL NOT NULL,
          mid_min REAL NOT NULL,
          mid_max REAL NOT NULL,
          low_min REAL NOT NULL,
          low_max REAL NOT NULL,
          target_rnr REAL NOT NULL,
          target_accuracy REAL NOT NULL,
          avg_reproducibility REAL,
          avg_repeatability REAL,
          total_range REAL,
          calculated_rnr REAL,
          avg_accuracy_gap REAL,
          scoring_opened_at TEXT,
          scoring_closed_at TEXT,
          results_published_at TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS calibration_participants (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          user_id TEXT NOT NULL,
          role TEXT NOT NULL,
          has_completed_scoring INTEGER NOT NULL DEFAULT 0,
          completed_at TEXT,
          UNIQUE(session_id, user_id),
          FOREIGN KEY(session_id) REFERENCES calibration_sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS calibration_tickets (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          ticket_type TEXT NOT NULL,
          group_id TEXT,
          pass_number INTEGER,
          audit_id TEXT NOT NULL,
          ticket_ref TEXT,
          agent_name TEXT,
          metadata_json TEXT NOT NULL,
          anchor_id TEXT,
          anchor_score REAL,
          score_range TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(session_id) REFERENCES calibration_sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS calibration_anchors (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          score_range TEXT NOT NULL,
          audit_id TEXT NOT NULL,
          ticket_ref TEXT,
          agent_name TEXT,
          metadata_json TEXT NOT NULL,
          score REAL NOT NULL,
          qa_tl_approved INTEGER,
          qa_tl_approver_id TEXT,
          qa_tl_approved_at TEXT,
          am_sdm_approved INTEGER,
          am_sdm_approver_id TEXT,
          am_sdm_approved_at TEXT,
          status TEXT NOT NULL,
          rejection_reason TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(session_id) REFERENCES calibration_sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS calibration_scores (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          ticket_id TEXT NOT NULL,
          participant_id TEXT NOT NULL,
          total_score REAL NOT NULL,
          score_details_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE(ticket_id, participant_id),
          FOREIGN KEY(session_id) REFERENCES calibration_sessions(id) ON DELETE CASCADE,
          FOREIGN KEY(ticket_id) REFERENCES calibration_tickets(id) ON DELETE CASCADE,
          FOREIGN KEY(participant_id) REFERENCES calibration_participants(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS calibration_results (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          user_id TEXT,
          avg_reproducibility REAL,
          avg_repeatability REAL,
          total_range REAL,
          calculated_rnr REAL,
          avg_accuracy_gap REAL,
          passed_rnr INTEGER,
          passed_accuracy INTEGER NOT NULL,
          calculated_at TEXT NOT NULL,
          FOREIGN KEY(session_id) REFERENCES calibration_sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user ON calibration_participants(user_id, role);
        CREATE INDEX IF NOT EXISTS idx_tickets_session_type ON calibration_tickets(session_id, ticket_type);
        CREATE INDEX IF NOT EXISTS idx_tickets_group ON calibration_tickets(group_id);
        CREATE INDEX IF NOT EXISTS idx_anchors_session_status ON calibration_anchors(session_id, status);
        CREATE INDEX IF NOT EXISTS idx_scores_session ON calibration_scores(session_id);
        CREATE INDEX IF NOT EXISTS idx_scores_participant ON calibration_scores(participant_id);
        CREATE INDEX IF NOT EXISTS idx_results_session ON calibration_results(session_id, calculated_at);
        ",
        )
        .context("failed to create calibration tables")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}
