use std::collections::HashSet;

use chrono::Utc;
use rusqlite::TransactionBehavior;
use tracing::info;

use super::{CalibrationEngine, advance_status, new_id};
use crate::db;
use crate::error::{CalibrationError, EngineResult};
use crate::model::{
    CalibrationParticipant, CalibrationSession, NewSession, ScoreRange, SessionDetail,
    SessionStatus,
};

fn invalid(message: impl Into<String>) -> CalibrationError {
    CalibrationError::InvalidInput(message.into())
}

fn check_new_session(input: &NewSession) -> EngineResult<()> {
    if input.title.trim().is_empty() {
        return Err(invalid("title must not be empty"));
    }
    if input.campaign_id.trim().is_empty() {
        return Err(invalid("campaign_id must not be empty"));
    }
    if input.reproducibility_ticket_count == 0 && input.repeatability_ticket_count == 0 {
        return Err(invalid(
            "at least one reproducibility or repeatability ticket is required",
        ));
    }
    for range in ScoreRange::ALL {
        let bounds = input.score_ranges.bounds(range);
        let ordered = bounds.min <= bounds.max;
        let in_scale = bounds.min >= 0.0 && bounds.max <= 100.0;
        if !ordered || !in_scale {
            return Err(invalid(format!(
                "{range} score range [{}, {}] must satisfy 0 <= min <= max <= 100",
                bounds.min, bounds.max
            )));
        }
    }
    let positive = |value: f64| value.is_finite() && value > 0.0;
    if !positive(input.target_rnr) || !positive(input.target_accuracy) {
        return Err(invalid("targets must be positive"));
    }
    if input.raters.is_empty() {
        return Err(invalid("at least one RATER is required"));
    }
    if input.qa_team_leads.is_empty() || input.am_sdm_approvers.is_empty() {
        return Err(invalid("at least one QA_TL and one AM_SDM approver are required"));
    }

    let mut seen = HashSet::new();
    for (user_id, _) in input.participants() {
        if !seen.insert(user_id) {
            return Err(invalid(format!(
                "user {user_id} is listed more than once; a participant holds one role per session"
            )));
        }
    }
    Ok(())
}

impl CalibrationEngine {
    pub fn create_session(&mut self, input: &NewSession) -> EngineResult<SessionDetail> {
        check_new_session(input)?;
        for (user_id, role) in input.participants() {
            if !self.identity.has_role(user_id, role)? {
                return Err(CalibrationError::not_authorized(
                    user_id,
                    format!("join a session as {role}"),
                ));
            }
        }

        let Self {
            connection, config, ..
        } = self;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if config.enforce_single_active_session {
            for user_id in &input.raters {
                if let Some(session_id) = db::find_active_rater_session(&tx, user_id)? {
                    return Err(CalibrationError::ActiveSessionConflict {
                        user_id: user_id.clone(),
                        session_id,
                    });
                }
            }
        }

        let now = Utc::now();
        let session = CalibrationSession {
            id: new_id(),
            campaign_id: input.campaign_id.clone(),
            title: input.title.trim().to_string(),
            description: input.description.clone(),
            scheduled_at: input.scheduled_at,
            status: SessionStatus::Scheduled,
            reproducibility_ticket_count: input.reproducibility_ticket_count,
            repeatability_ticket_count: input.repeatability_ticket_count,
            score_ranges: input.score_ranges,
            target_rnr: input.target_rnr,
            target_accuracy: input.target_accuracy,
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
        };
        db::insert_session(&tx, &session)?;

        for (user_id, role) in input.participants() {
            let participant = CalibrationParticipant {
                id: new_id(),
                session_id: session.id.clone(),
                user_id: user_id.to_string(),
                role,
                has_completed_scoring: false,
                completed_at: None,
            };
            db::insert_participant(&tx, &participant)?;
        }

        let detail = load_detail(&tx, &session.id)?;
        tx.commit()?;

        info!(
            session_id = %session.id,
            campaign_id = %session.campaign_id,
            raters = input.raters.len(),
            "calibration session created"
        );
        Ok(detail)
    }

    pub fn cancel_session(&mut self, session_id: &str) -> EngineResult<CalibrationSession> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = db::load_session(&tx, session_id)?;

        match session.status {
            SessionStatus::Cancelled => return Ok(session),
            SessionStatus::Completed => {
                return Err(CalibrationError::ValidationState(format!(
                    "session {session_id} is already completed"
                )));
            }
            _ => {}
        }

        advance_status(
            &tx,
            session_id,
            session.status,
            SessionStatus::Cancelled,
            Utc::now(),
        )?;
        let retired = db::reject_pending_anchors(&tx, session_id, "session cancelled")?;
        let cancelled = db::load_session(&tx, session_id)?;
        tx.commit()?;

        info!(
            session_id = %session_id,
            from = %session.status,
            retired_anchors = retired,
            "calibration session cancelled"
        );
        Ok(cancelled)
    }

    pub fn delete_session(&mut self, session_id: &str) -> EngineResult<()> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !db::delete_session(&tx, session_id)? {
            return Err(CalibrationError::not_found("session", session_id));
        }
        tx.commit()?;
        info!(session_id = %session_id, "calibration session deleted");
        Ok(())
    }

    pub fn session_detail(&self, session_id: &str) -> EngineResult<SessionDetail> {
        load_detail(&self.connection, session_id)
    }
}

fn load_detail(connection: &rusqlite::Connection, session_id: &str) -> EngineResult<SessionDetail> {
    Ok(SessionDetail {
        session: db::load_session(connection, session_id)?,
        participants: db::load_participants(connection, session_id)?,
        tickets: db::load_tickets(connection, session_id)?,
        anchors: db::load_anchors(connection, session_id)?,
        scores: db::load_scores(connection, session_id)?,
        results: db::load_results(connection, session_id)?,
    })
}
