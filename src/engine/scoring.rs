use chrono::Utc;
use rusqlite::TransactionBehavior;
use serde_json::Value;
use tracing::{debug, info};

use super::results::persist_results;
use super::{CalibrationEngine, advance_status, new_id, require_status};
use crate::db;
use crate::error::{CalibrationError, EngineResult};
use crate::model::{CalibrationScore, ParticipantRole, SessionStatus};
use crate::notify::CalibrationEvent;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

fn check_score(total_score: f64) -> EngineResult<()> {
    if total_score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&total_score) {
        return Ok(());
    }
    Err(CalibrationError::InvalidInput(format!(
        "total score {total_score} is outside {MIN_SCORE}..={MAX_SCORE}"
    )))
}

impl CalibrationEngine {
    pub fn submit_score(
        &mut self,
        session_id: &str,
        ticket_id: &str,
        user_id: &str,
        total_score: f64,
        details: Value,
    ) -> EngineResult<CalibrationScore> {
        check_score(total_score)?;

        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let session = db::load_session(&tx, session_id)?;
        let participant = db::find_participant(&tx, session_id, user_id)?
            .ok_or_else(|| CalibrationError::not_authorized(user_id, "score in this session"))?;
        let ticket = db::load_ticket(&tx, ticket_id)?;
        if ticket.session_id != session.id {
            return Err(CalibrationError::not_found("ticket", ticket_id));
        }
        require_status(&session, &[SessionStatus::ScoringOpen], "submit scores")?;

        let now = Utc::now();
        let score = db::upsert_score(
            &tx,
            &new_id(),
            &session.id,
            &ticket.id,
            &participant.id,
            total_score,
            &details,
            now,
        )?;
        debug!(
            session_id = %session.id,
            ticket_id = %ticket.id,
            user_id = %user_id,
            total_score,
            "score recorded"
        );

        let required = db::session_ticket_ids(&tx, &session.id)?;
        let scored = db::scored_ticket_ids(&tx, &participant.id)?;
        let participant_complete = required.is_subset(&scored);
        if participant_complete && db::mark_participant_complete(&tx, &participant.id, now)? {
            info!(
                session_id = %session.id,
                user_id = %user_id,
                role = %participant.role,
                "participant completed scoring"
            );
        }

        // Re-run whenever the caller is complete so a check lost to a
        // concurrent final submission is picked up by the next one.
        let mut published = None;
        if participant_complete {
            let raters_complete = db::load_participants(&tx, &session.id)?
                .iter()
                .filter(|member| member.role == ParticipantRole::Rater)
                .all(|member| member.has_completed_scoring);

            if raters_complete
                && advance_status(
                    &tx,
                    &session.id,
                    SessionStatus::ScoringOpen,
                    SessionStatus::ScoringClosed,
                    now,
                )?
            {
                info!(session_id = %session.id, "all raters complete, scoring closed");
                let summary = persist_results(&tx, &session, Utc::now())?;
                advance_status(
                    &tx,
                    &session.id,
                    SessionStatus::ScoringClosed,
                    SessionStatus::Completed,
                    Utc::now(),
                )?;
                published = Some(summary.session);
            }
        }
        tx.commit()?;

        if let Some(result) = published {
            self.publish(CalibrationEvent::ResultsPublished {
                session_id: session.id,
                calculated_rnr: result.calculated_rnr,
                passed_rnr: result.passed_rnr.unwrap_or(false),
                passed_accuracy: result.passed_accuracy,
            });
        }
        Ok(score)
    }
}
