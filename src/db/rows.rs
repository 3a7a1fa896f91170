use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::error::{CalibrationError, EngineResult};
use crate::model::{
    AnchorStatus, CalibrationAnchor, CalibrationParticipant, CalibrationResult, CalibrationScore,
    CalibrationSession, CalibrationTicket, ParticipantRole, RangeBounds, ScoreRanges,
    SessionStatus, TicketType,
};

const SESSION_COLUMNS: &str = "
    id, campaign_id, title, description, scheduled_at, status,
    reproducibility_ticket_count, repeatability_ticket_count,
    high_min, high_max, mid_min, mid_max, low_min, low_max,
    target_rnr, target_accuracy,
    avg_reproducibility, avg_repeatability, total_range, calculated_rnr, avg_accuracy_gap,
    scoring_opened_at, scoring_closed_at, results_published_at, created_at, updated_at";

const PARTICIPANT_COLUMNS: &str =
    "id, session_id, user_id, role, has_completed_scoring, completed_at";

const TICKET_COLUMNS: &str = "
    id, session_id, ticket_type, group_id, pass_number, audit_id, ticket_ref, agent_name,
    metadata_json, anchor_id, anchor_score, score_range, created_at";

const ANCHOR_COLUMNS: &str = "
    id, session_id, score_range, audit_id, ticket_ref, agent_name, metadata_json, score,
    qa_tl_approved, qa_tl_approver_id, qa_tl_approved_at,
    am_sdm_approved, am_sdm_approver_id, am_sdm_approved_at,
    status, rejection_reason, created_at";

const SCORE_COLUMNS: &str = "
    id, session_id, ticket_id, participant_id, total_score, score_details_json,
    created_at, updated_at";

const RESULT_COLUMNS: &str = "
    id, session_id, user_id, avg_reproducibility, avg_repeatability, total_range,
    calculated_rnr, avg_accuracy_gap, passed_rnr, passed_accuracy, calculated_at";

#[derive(Debug, Clone, Copy)]
pub struct SessionMetrics {
    pub avg_reproducibility: f64,
    pub avg_repeatability: f64,
    pub total_range: f64,
    pub calculated_rnr: Option<f64>,
    pub avg_accuracy_gap: Option<f64>,
}

fn json_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationSession> {
    Ok(CalibrationSession {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        scheduled_at: row.get(4)?,
        status: row.get(5)?,
        reproducibility_ticket_count: row.get(6)?,
        repeatability_ticket_count: row.get(7)?,
        score_ranges: ScoreRanges {
            high: RangeBounds::new(row.get(8)?, row.get(9)?),
            mid: RangeBounds::new(row.get(10)?, row.get(11)?),
            low: RangeBounds::new(row.get(12)?, row.get(13)?),
        },
        target_rnr: row.get(14)?,
        target_accuracy: row.get(15)?,
        avg_reproducibility: row.get(16)?,
        avg_repeatability: row.get(17)?,
        total_range: row.get(18)?,
        calculated_rnr: row.get(19)?,
        avg_accuracy_gap: row.get(20)?,
        scoring_opened_at: row.get(21)?,
        scoring_closed_at: row.get(22)?,
        results_published_at: row.get(23)?,
        created_at: row.get(24)?,
        updated_at: row.get(25)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationParticipant> {
    Ok(CalibrationParticipant {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        has_completed_scoring: row.get(4)?,
        completed_at: row.get(5)?,
    })
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationTicket> {
    Ok(CalibrationTicket {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ticket_type: row.get(2)?,
        group_id: row.get(3)?,
        pass_number: row.get(4)?,
        audit_id: row.get(5)?,
        ticket_ref: row.get(6)?,
        agent_name: row.get(7)?,
        metadata: json_column(row, 8)?,
        anchor_id: row.get(9)?,
        anchor_score: row.get(10)?,
        score_range: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn anchor_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationAnchor> {
    Ok(CalibrationAnchor {
        id: row.get(0)?,
        session_id: row.get(1)?,
        score_range: row.get(2)?,
        audit_id: row.get(3)?,
        ticket_ref: row.get(4)?,
        agent_name: row.get(5)?,
        metadata: json_column(row, 6)?,
        score: row.get(7)?,
        qa_tl_approved: row.get(8)?,
        qa_tl_approver_id: row.get(9)?,
        qa_tl_approved_at: row.get(10)?,
        am_sdm_approved: row.get(11)?,
        am_sdm_approver_id: row.get(12)?,
        am_sdm_approved_at: row.get(13)?,
        status: row.get(14)?,
        rejection_reason: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationScore> {
    Ok(CalibrationScore {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ticket_id: row.get(2)?,
        participant_id: row.get(3)?,
        total_score: row.get(4)?,
        score_details: json_column(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<CalibrationResult> {
    Ok(CalibrationResult {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        avg_reproducibility: row.get(3)?,
        avg_repeatability: row.get(4)?,
        total_range: row.get(5)?,
        calculated_rnr: row.get(6)?,
        avg_accuracy_gap: row.get(7)?,
        passed_rnr: row.get(8)?,
        passed_accuracy: row.get(9)?,
        calculated_at: row.get(10)?,
    })
}

pub fn insert_session(connection: &Connection, session: &CalibrationSession) -> EngineResult<()> {
    let ranges = &session.score_ranges;
    connection.execute(
        "
        INSERT INTO calibration_sessions(
          id, campaign_id, title, description, scheduled_at, status,
          reproducibility_ticket_count, repeatability_ticket_count,
          high_min, high_max, mid_min, mid_max, low_min, low_max,
          target_rnr, target_accuracy, created_at, updated_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ",
        params![
            session.id,
            session.campaign_id,
            session.title,
            session.description,
            session.scheduled_at,
            session.status,
            session.reproducibility_ticket_count,
            session.repeatability_ticket_count,
            ranges.high.min,
            ranges.high.max,
            ranges.mid.min,
            ranges.mid.max,
            ranges.low.min,
            ranges.low.max,
            session.target_rnr,
            session.target_accuracy,
            session.created_at,
            session.updated_at,
        ],
    )?;
    Ok(())
}

pub fn load_session(connection: &Connection, session_id: &str) -> EngineResult<CalibrationSession> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM calibration_sessions WHERE id = ?1");
    connection
        .query_row(&sql, [session_id], session_from_row)
        .optional()?
        .ok_or_else(|| CalibrationError::not_found("session", session_id))
}

/// Moves a session from `from` to `to`, stamping `stamp_column` when given.
/// Returns false when the session was not in `from`, which makes a repeated
/// transition a no-op.
pub fn update_session_status_if(
    connection: &Connection,
    session_id: &str,
    from: SessionStatus,
    to: SessionStatus,
    stamp_column: Option<&'static str>,
    at: DateTime<Utc>,
) -> EngineResult<bool> {
    let stamp = stamp_column
        .map(|column| format!(", {column} = ?4"))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE calibration_sessions SET status = ?1, updated_at = ?4{stamp} WHERE id = ?2 AND status = ?3"
    );
    let changed = connection.execute(&sql, params![to, session_id, from, at])?;
    Ok(changed == 1)
}

pub fn update_session_metrics(
    connection: &Connection,
    session_id: &str,
    metrics: &SessionMetrics,
    at: DateTime<Utc>,
) -> EngineResult<()> {
    connection.execute(
        "
        UPDATE calibration_sessions SET
          avg_reproducibility = ?2,
          avg_repeatability = ?3,
          total_range = ?4,
          calculated_rnr = ?5,
          avg_accuracy_gap = ?6,
          updated_at = ?7
        WHERE id = ?1
        ",
        params![
            session_id,
            metrics.avg_reproducibility,
            metrics.avg_repeatability,
            metrics.total_range,
            metrics.calculated_rnr,
            metrics.avg_accuracy_gap,
            at,
        ],
    )?;
    Ok(())
}

pub fn touch_results_published(
    connection: &Connection,
    session_id: &str,
    at: DateTime<Utc>,
) -> EngineResult<()> {
    connection.execute(
        "UPDATE calibration_sessions SET results_published_at = ?2, updated_at = ?2 WHERE id = ?1",
        params![session_id, at],
    )?;
    Ok(())
}

pub fn delete_session(connection: &Connection, session_id: &str) -> EngineResult<bool> {
    let deleted = connection.execute(
        "DELETE FROM calibration_sessions WHERE id = ?1",
        [session_id],
    )?;
    Ok(deleted == 1)
}

pub fn insert_participant(
    connection: &Connection,
    participant: &CalibrationParticipant,
) -> EngineResult<()> {
    connection.execute(
        "
        INSERT INTO calibration_participants(id, session_id, user_id, role, has_completed_scoring, completed_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            participant.id,
            participant.session_id,
            participant.user_id,
            participant.role,
            participant.has_completed_scoring,
            participant.completed_at,
        ],
    )?;
    Ok(())
}

pub fn load_participants(
    connection: &Connection,
    session_id: &str,
) -> EngineResult<Vec<CalibrationParticipant>> {
    let sql = format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM calibration_participants WHERE session_id = ?1 ORDER BY role, user_id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map([session_id], participant_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_participant(
    connection: &Connection,
    session_id: &str,
    user_id: &str,
) -> EngineResult<Option<CalibrationParticipant>> {
    let sql = format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM calibration_participants WHERE session_id = ?1 AND user_id = ?2"
    );
    Ok(connection
        .query_row(&sql, params![session_id, user_id], participant_from_row)
        .optional()?)
}

pub fn find_active_rater_session(
    connection: &Connection,
    user_id: &str,
) -> EngineResult<Option<String>> {
    let active = SessionStatus::ACTIVE;
    Ok(connection
        .query_row(
            "
            SELECT s.id
            FROM calibration_participants p
            JOIN calibration_sessions s ON s.id = p.session_id
            WHERE p.user_id = ?1 AND p.role = ?2 AND s.status IN (?3, ?4, ?5, ?6)
            ORDER BY s.created_at ASC
            LIMIT 1
            ",
            params![
                user_id,
                ParticipantRole::Rater,
                active[0],
                active[1],
                active[2],
                active[3]
            ],
            |row| row.get(0),
        )
        .optional()?)
}

/// Sets the completion flag once. Returns true only for the call that flips it.
pub fn mark_participant_complete(
    connection: &Connection,
    participant_id: &str,
    at: DateTime<Utc>,
) -> EngineResult<bool> {
    let changed = connection.execute(
        "
        UPDATE calibration_participants
        SET has_completed_scoring = 1, completed_at = ?2
        WHERE id = ?1 AND has_completed_scoring = 0
        ",
        params![participant_id, at],
    )?;
    Ok(changed == 1)
}

pub fn insert_ticket(connection: &Connection, ticket: &CalibrationTicket) -> EngineResult<()> {
    let metadata = serde_json::to_string(&ticket.metadata)?;
    connection.execute(
        "
        INSERT INTO calibration_tickets(
          id, session_id, ticket_type, group_id, pass_number, audit_id, ticket_ref, agent_name,
          metadata_json, anchor_id, anchor_score, score_range, created_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ",
        params![
            ticket.id,
            ticket.session_id,
            ticket.ticket_type,
            ticket.group_id,
            ticket.pass_number,
            ticket.audit_id,
            ticket.ticket_ref,
            ticket.agent_name,
            metadata,
            ticket.anchor_id,
            ticket.anchor_score,
            ticket.score_range,
            ticket.created_at,
        ],
    )?;
    Ok(())
}

pub fn load_tickets(
    connection: &Connection,
    session_id: &str,
) -> EngineResult<Vec<CalibrationTicket>> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM calibration_tickets WHERE session_id = ?1 ORDER BY ticket_type, group_id, pass_number, created_at, id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map([session_id], ticket_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn load_ticket(connection: &Connection, ticket_id: &str) -> EngineResult<CalibrationTicket> {
    let sql = format!("SELECT {TICKET_COLUMNS} FROM calibration_tickets WHERE id = ?1");
    connection
        .query_row(&sql, [ticket_id], ticket_from_row)
        .optional()?
        .ok_or_else(|| CalibrationError::not_found("ticket", ticket_id))
}

pub fn count_tickets_of_type(
    connection: &Connection,
    session_id: &str,
    ticket_type: TicketType,
) -> EngineResult<usize> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM calibration_tickets WHERE session_id = ?1 AND ticket_type = ?2",
        params![session_id, ticket_type],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn session_ticket_ids(connection: &Connection, session_id: &str) -> EngineResult<HashSet<String>> {
    let mut statement =
        connection.prepare("SELECT id FROM calibration_tickets WHERE session_id = ?1")?;
    let rows = statement.query_map([session_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}

pub fn insert_anchor(connection: &Connection, anchor: &CalibrationAnchor) -> EngineResult<()> {
    let metadata = serde_json::to_string(&anchor.metadata)?;
    connection.execute(
        "
        INSERT INTO calibration_anchors(
          id, session_id, score_range, audit_id, ticket_ref, agent_name, metadata_json, score,
          qa_tl_approved, qa_tl_approver_id, qa_tl_approved_at,
          am_sdm_approved, am_sdm_approver_id, am_sdm_approved_at,
          status, rejection_reason, created_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        ",
        params![
            anchor.id,
            anchor.session_id,
            anchor.score_range,
            anchor.audit_id,
            anchor.ticket_ref,
            anchor.agent_name,
            metadata,
            anchor.score,
            anchor.qa_tl_approved,
            anchor.qa_tl_approver_id,
            anchor.qa_tl_approved_at,
            anchor.am_sdm_approved,
            anchor.am_sdm_approver_id,
            anchor.am_sdm_approved_at,
            anchor.status,
            anchor.rejection_reason,
            anchor.created_at,
        ],
    )?;
    Ok(())
}

pub fn load_anchor(connection: &Connection, anchor_id: &str) -> EngineResult<CalibrationAnchor> {
    let sql = format!("SELECT {ANCHOR_COLUMNS} FROM calibration_anchors WHERE id = ?1");
    connection
        .query_row(&sql, [anchor_id], anchor_from_row)
        .optional()?
        .ok_or_else(|| CalibrationError::not_found("anchor", anchor_id))
}

pub fn load_anchors(
    connection: &Connection,
    session_id: &str,
) -> EngineResult<Vec<CalibrationAnchor>> {
    let sql = format!(
        "SELECT {ANCHOR_COLUMNS} FROM calibration_anchors WHERE session_id = ?1 ORDER BY created_at, id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map([session_id], anchor_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn update_anchor_decisions(
    connection: &Connection,
    anchor: &CalibrationAnchor,
) -> EngineResult<()> {
    connection.execute(
        "
        UPDATE calibration_anchors SET
          qa_tl_approved = ?2,
          qa_tl_approver_id = ?3,
          qa_tl_approved_at = ?4,
          am_sdm_approved = ?5,
          am_sdm_approver_id = ?6,
          am_sdm_approved_at = ?7,
          status = ?8,
          rejection_reason = ?9
        WHERE id = ?1
        ",
        params![
            anchor.id,
            anchor.qa_tl_approved,
            anchor.qa_tl_approver_id,
            anchor.qa_tl_approved_at,
            anchor.am_sdm_approved,
            anchor.am_sdm_approver_id,
            anchor.am_sdm_approved_at,
            anchor.status,
            anchor.rejection_reason,
        ],
    )?;
    Ok(())
}

pub fn reject_pending_anchors(
    connection: &Connection,
    session_id: &str,
    reason: &str,
) -> EngineResult<usize> {
    let changed = connection.execute(
        "
        UPDATE calibration_anchors SET status = ?3, rejection_reason = ?4
        WHERE session_id = ?1 AND status = ?2
        ",
        params![
            session_id,
            AnchorStatus::PendingValidation,
            AnchorStatus::Rejected,
            reason
        ],
    )?;
    Ok(changed)
}

pub fn session_anchor_audit_ids(
    connection: &Connection,
    session_id: &str,
) -> EngineResult<Vec<String>> {
    let mut statement =
        connection.prepare("SELECT audit_id FROM calibration_anchors WHERE session_id = ?1")?;
    let rows = statement.query_map([session_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[allow(clippy::too_many_arguments)]
pub fn upsert_score(
    connection: &Connection,
    score_id: &str,
    session_id: &str,
    ticket_id: &str,
    participant_id: &str,
    total_score: f64,
    details: &Value,
    at: DateTime<Utc>,
) -> EngineResult<CalibrationScore> {
    let details_json = serde_json::to_string(details)?;
    connection.execute(
        "
        INSERT INTO calibration_scores(
          id, session_id, ticket_id, participant_id, total_score, score_details_json, created_at, updated_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        ON CONFLICT(ticket_id, participant_id) DO UPDATE SET
          total_score=excluded.total_score,
          score_details_json=excluded.score_details_json,
          updated_at=excluded.updated_at
        ",
        params![
            score_id,
            session_id,
            ticket_id,
            participant_id,
            total_score,
            details_json,
            at,
        ],
    )?;

    let sql = format!(
        "SELECT {SCORE_COLUMNS} FROM calibration_scores WHERE ticket_id = ?1 AND participant_id = ?2"
    );
    Ok(connection.query_row(&sql, params![ticket_id, participant_id], score_from_row)?)
}

pub fn load_scores(connection: &Connection, session_id: &str) -> EngineResult<Vec<CalibrationScore>> {
    let sql = format!(
        "SELECT {SCORE_COLUMNS} FROM calibration_scores WHERE session_id = ?1 ORDER BY ticket_id, participant_id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map([session_id], score_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn scored_ticket_ids(
    connection: &Connection,
    participant_id: &str,
) -> EngineResult<HashSet<String>> {
    let mut statement = connection
        .prepare("SELECT DISTINCT ticket_id FROM calibration_scores WHERE participant_id = ?1")?;
    let rows = statement.query_map([participant_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}

pub fn insert_result(connection: &Connection, result: &CalibrationResult) -> EngineResult<()> {
    connection.execute(
        "
        INSERT INTO calibration_results(
          id, session_id, user_id, avg_reproducibility, avg_repeatability, total_range,
          calculated_rnr, avg_accuracy_gap, passed_rnr, passed_accuracy, calculated_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
        params![
            result.id,
            result.session_id,
            result.user_id,
            result.avg_reproducibility,
            result.avg_repeatability,
            result.total_range,
            result.calculated_rnr,
            result.avg_accuracy_gap,
            result.passed_rnr,
            result.passed_accuracy,
            result.calculated_at,
        ],
    )?;
    Ok(())
}

pub fn load_results(
    connection: &Connection,
    session_id: &str,
) -> EngineResult<Vec<CalibrationResult>> {
    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM calibration_results WHERE session_id = ?1 ORDER BY calculated_at, rowid"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map([session_id], result_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
