use chrono::Utc;
use serde_json::json;

use super::*;
use crate::error::CalibrationError;
use crate::model::{
    CalibrationParticipant, CalibrationSession, CalibrationTicket, ParticipantRole, RangeBounds,
    ScoreRanges, SessionStatus, TicketType,
};

fn session(id: &str, status: SessionStatus) -> CalibrationSession {
    let now = Utc::now();
    CalibrationSession {
        id: id.to_string(),
        campaign_id: "camp-1".to_string(),
        title: "Calibration".to_string(),
        description: Some("monthly".to_string()),
        scheduled_at: now,
        status,
        reproducibility_ticket_count: 1,
        repeatability_ticket_count: 0,
        score_ranges: ScoreRanges {
            high: RangeBounds::new(85.0, 100.0),
            mid: RangeBounds::new(60.0, 84.0),
            low: RangeBounds::new(0.0, 59.0),
        },
        target_rnr: 30.0,
        target_accuracy: 10.0,
        avg_reproducibility: None,
        avg_repeatability: None,
        total_range: None,
        calculated_rnr: None,
        avg_accuracy_gap: None,
        scoring_opened_at: None,
        scoring_closed_at: None,
        results_published_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn participant(id: &str, session_id: &str, user_id: &str) -> CalibrationParticipant {
    CalibrationParticipant {
        id: id.to_string(),
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        role: ParticipantRole::Rater,
        has_completed_scoring: false,
        completed_at: None,
    }
}

fn ticket(id: &str, session_id: &str) -> CalibrationTicket {
    CalibrationTicket {
        id: id.to_string(),
        session_id: session_id.to_string(),
        ticket_type: TicketType::Reproducibility,
        group_id: None,
        pass_number: None,
        audit_id: format!("audit-{id}"),
        ticket_ref: None,
        agent_name: None,
        metadata: json!({ "queue": "billing" }),
        anchor_id: None,
        anchor_score: None,
        score_range: None,
        created_at: Utc::now(),
    }
}

fn seeded() -> rusqlite::Connection {
    let connection = open_in_memory().expect("in-memory database");
    insert_session(&connection, &session("s-1", SessionStatus::ScoringOpen)).expect("session");
    insert_participant(&connection, &participant("p-1", "s-1", "u-1")).expect("participant");
    insert_ticket(&connection, &ticket("t-1", "s-1")).expect("ticket");
    connection
}

#[test]
fn ensure_schema_is_idempotent_and_records_version() {
    let connection = open_in_memory().expect("in-memory database");
    ensure_schema(&connection).expect("second run");

    let version: String = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'db_schema_version'",
            [],
            |row| row.get(0),
        )
        .expect("version row");
    assert_eq!(version, DB_SCHEMA_VERSION);
}

#[test]
fn session_round_trips_through_columns() {
    let connection = seeded();
    let loaded = load_session(&connection, "s-1").expect("session");
    assert_eq!(loaded.status, SessionStatus::ScoringOpen);
    assert_eq!(loaded.score_ranges.mid, RangeBounds::new(60.0, 84.0));
    assert_eq!(loaded.description.as_deref(), Some("monthly"));

    let tickets = load_tickets(&connection, "s-1").expect("tickets");
    assert_eq!(tickets[0].metadata, json!({ "queue": "billing" }));

    assert!(matches!(
        load_session(&connection, "missing"),
        Err(CalibrationError::NotFound {
            entity: "session",
            ..
        })
    ));
}

#[test]
fn conditional_status_update_applies_once() {
    let connection = seeded();
    let now = Utc::now();
    let first = update_session_status_if(
        &connection,
        "s-1",
        SessionStatus::ScoringOpen,
        SessionStatus::ScoringClosed,
        Some("scoring_closed_at"),
        now,
    )
    .expect("update");
    let second = update_session_status_if(
        &connection,
        "s-1",
        SessionStatus::ScoringOpen,
        SessionStatus::ScoringClosed,
        Some("scoring_closed_at"),
        now,
    )
    .expect("update");

    assert!(first);
    assert!(!second);
    let loaded = load_session(&connection, "s-1").expect("session");
    assert_eq!(loaded.status, SessionStatus::ScoringClosed);
    assert!(loaded.scoring_closed_at.is_some());
}

#[test]
fn score_upsert_keeps_one_row_per_ticket_and_participant() {
    let connection = seeded();
    upsert_score(&connection, "sc-1", "s-1", "t-1", "p-1", 60.0, &json!({}), Utc::now())
        .expect("insert");
    let updated = upsert_score(
        &connection,
        "sc-2",
        "s-1",
        "t-1",
        "p-1",
        65.0,
        &json!({ "empathy": 2 }),
        Utc::now(),
    )
    .expect("update");

    assert_eq!(updated.id, "sc-1");
    assert_eq!(updated.total_score, 65.0);
    assert_eq!(load_scores(&connection, "s-1").expect("scores").len(), 1);
    assert_eq!(
        scored_ticket_ids(&connection, "p-1").expect("scored"),
        session_ticket_ids(&connection, "s-1").expect("tickets")
    );
}

#[test]
fn participant_completion_flips_only_once() {
    let connection = seeded();
    let first_at = Utc::now();
    assert!(mark_participant_complete(&connection, "p-1", first_at).expect("first"));
    assert!(!mark_participant_complete(&connection, "p-1", Utc::now()).expect("second"));

    let stored = find_participant(&connection, "s-1", "u-1")
        .expect("lookup")
        .expect("participant");
    assert!(stored.has_completed_scoring);
    assert_eq!(stored.completed_at, Some(first_at));
}

#[test]
fn active_rater_lookup_ignores_terminal_sessions() {
    let connection = seeded();
    assert_eq!(
        find_active_rater_session(&connection, "u-1").expect("lookup"),
        Some("s-1".to_string())
    );

    insert_session(&connection, &session("s-2", SessionStatus::Completed)).expect("session");
    insert_participant(&connection, &participant("p-2", "s-2", "u-2")).expect("participant");
    assert_eq!(
        find_active_rater_session(&connection, "u-2").expect("lookup"),
        None
    );
}

#[test]
fn deleting_a_session_cascades() {
    let connection = seeded();
    upsert_score(&connection, "sc-1", "s-1", "t-1", "p-1", 60.0, &json!({}), Utc::now())
        .expect("score");

    assert!(delete_session(&connection, "s-1").expect("delete"));
    assert!(!delete_session(&connection, "s-1").expect("second delete"));
    assert!(load_participants(&connection, "s-1").expect("participants").is_empty());
    assert!(load_tickets(&connection, "s-1").expect("tickets").is_empty());
    assert!(load_scores(&connection, "s-1").expect("scores").is_empty());
}
