use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};

use super::sampler::{anchor_from_record, shuffle_and_take};
use super::{CalibrationEngine, advance_status, new_id};
use crate::archive::{ArchiveQuery, HistoricalArchive};
use crate::config::EngineConfig;
use crate::db;
use crate::error::{CalibrationError, EngineResult};
use crate::model::{
    AnchorStatus, CalibrationAnchor, CalibrationSession, CalibrationTicket, ParticipantRole,
    SessionStatus, TicketType,
};
use crate::notify::CalibrationEvent;

pub(super) fn apply_decision(
    anchor: &mut CalibrationAnchor,
    role: ParticipantRole,
    approver_id: &str,
    approved: bool,
    reason: Option<&str>,
    at: DateTime<Utc>,
) {
    match role {
        ParticipantRole::QaTl => {
            anchor.qa_tl_approved = Some(approved);
            anchor.qa_tl_approver_id = Some(approver_id.to_string());
            anchor.qa_tl_approved_at = Some(at);
        }
        ParticipantRole::AmSdm => {
            anchor.am_sdm_approved = Some(approved);
            anchor.am_sdm_approver_id = Some(approver_id.to_string());
            anchor.am_sdm_approved_at = Some(at);
        }
        ParticipantRole::Rater => return,
    }

    if let Some(reason) = reason.filter(|_| !approved) {
        anchor.rejection_reason = Some(reason.to_string());
    }

    anchor.status = match (anchor.qa_tl_approved, anchor.am_sdm_approved) {
        (Some(true), Some(true)) => AnchorStatus::Validated,
        (Some(_), Some(_)) => AnchorStatus::NonMatching,
        _ => AnchorStatus::PendingValidation,
    };
}

fn create_replacement(
    connection: &Connection,
    archive: &dyn HistoricalArchive,
    rng: &mut ChaCha8Rng,
    config: &EngineConfig,
    session: &CalibrationSession,
    discarded: &CalibrationAnchor,
) -> EngineResult<Option<CalibrationAnchor>> {
    let used = db::session_anchor_audit_ids(connection, &session.id)?;
    let cutoff = Utc::now() - Duration::days(config.pool_lookback_days);
    let query =
        ArchiveQuery::released_pool(&session.campaign_id, cutoff, config.anchor_candidate_cap)
            .in_range(session.score_ranges.bounds(discarded.score_range))
            .excluding(used);
    let candidates = archive.query(&query)?;
    let Ok(mut picked) = shuffle_and_take(candidates, 1, rng) else {
        return Ok(None);
    };
    let Some(record) = picked.pop() else {
        return Ok(None);
    };

    let replacement = anchor_from_record(
        new_id(),
        &session.id,
        discarded.score_range,
        &record,
    );
    db::insert_anchor(connection, &replacement)?;
    Ok(Some(replacement))
}

/// Opens scoring once at least `min_validated_anchors` live anchors exist and
/// all of them are validated. Returns the number of accuracy tickets created,
/// or `None` when the gate is not met or scoring is already open.
fn open_scoring_if_ready(
    connection: &Connection,
    rng: &mut ChaCha8Rng,
    config: &EngineConfig,
    session_id: &str,
) -> EngineResult<Option<usize>> {
    let session = db::load_session(connection, session_id)?;
    if session.status != SessionStatus::AnchorPending {
        return Ok(None);
    }

    let live = db::load_anchors(connection, session_id)?
        .into_iter()
        .filter(|anchor| anchor.status.is_live())
        .collect::<Vec<_>>();
    let all_validated = live
        .iter()
        .all(|anchor| anchor.status == AnchorStatus::Validated);
    if live.len() < config.min_validated_anchors || !all_validated {
        return Ok(None);
    }

    if db::count_tickets_of_type(connection, session_id, TicketType::Accuracy)? > 0 {
        return Ok(None);
    }

    let mut selected = live;
    selected.shuffle(rng);
    selected.truncate(config.accuracy_ticket_count);

    let now = Utc::now();
    for anchor in &selected {
        let ticket = CalibrationTicket {
            id: new_id(),
            session_id: session_id.to_string(),
            ticket_type: TicketType::Accuracy,
            group_id: None,
            pass_number: None,
            audit_id: anchor.audit_id.clone(),
            ticket_ref: anchor.ticket_ref.clone(),
            agent_name: anchor.agent_name.clone(),
            metadata: anchor.metadata.clone(),
            anchor_id: Some(anchor.id.clone()),
            anchor_score: Some(anchor.score),
            score_range: Some(anchor.score_range),
            created_at: now,
        };
        db::insert_ticket(connection, &ticket)?;
    }

    advance_status(
        connection,
        session_id,
        SessionStatus::AnchorPending,
        SessionStatus::ScoringOpen,
        now,
    )?;
    Ok(Some(selected.len()))
}

impl CalibrationEngine {
    pub fn validate_anchor(
        &mut self,
        anchor_id: &str,
        approver_user_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> EngineResult<CalibrationAnchor> {
        let Self {
            connection,
            archive,
            config,
            rng,
            ..
        } = self;

        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut anchor = db::load_anchor(&tx, anchor_id)?;
        let session = db::load_session(&tx, &anchor.session_id)?;

        let participant = db::find_participant(&tx, &session.id, approver_user_id)?
            .filter(|participant| participant.role.is_approver())
            .ok_or_else(|| {
                CalibrationError::not_authorized(approver_user_id, "validate anchors")
            })?;

        if anchor.status != AnchorStatus::PendingValidation {
            if anchor.decision_for(participant.role) == Some(approved) {
                return Ok(anchor);
            }
            return Err(CalibrationError::ValidationState(format!(
                "anchor {} is already {}; the recorded {} decision was kept, not overwritten",
                anchor.id, anchor.status, participant.role
            )));
        }
        if session.status != SessionStatus::AnchorPending {
            return Err(CalibrationError::ValidationState(format!(
                "cannot validate anchors while session {} is {}",
                session.id, session.status
            )));
        }

        apply_decision(
            &mut anchor,
            participant.role,
            approver_user_id,
            approved,
            reason,
            Utc::now(),
        );
        db::update_anchor_decisions(&tx, &anchor)?;
        info!(
            anchor_id = %anchor.id,
            session_id = %session.id,
            role = %participant.role,
            approved,
            status = %anchor.status,
            "anchor decision recorded"
        );

        let replacement = match anchor.status {
            AnchorStatus::NonMatching => {
                create_replacement(&tx, &**archive, rng, config, &session, &anchor)?
            }
            _ => None,
        };
        let opened = match anchor.status {
            AnchorStatus::PendingValidation => None,
            _ => open_scoring_if_ready(&tx, rng, config, &session.id)?,
        };
        let replacement_missing = anchor.status == AnchorStatus::NonMatching
            && replacement.is_none()
            && opened.is_none();
        tx.commit()?;

        if let Some(replacement) = &replacement {
            info!(
                anchor_id = %anchor.id,
                replacement_id = %replacement.id,
                range = %replacement.score_range,
                "replacement anchor created"
            );
            self.publish(CalibrationEvent::AnchorsPendingValidation {
                session_id: session.id.clone(),
                pending: 1,
            });
        }
        if let Some(accuracy_tickets) = opened {
            info!(session_id = %session.id, accuracy_tickets, "scoring opened");
            self.publish(CalibrationEvent::ScoringOpened {
                session_id: session.id.clone(),
                accuracy_tickets,
            });
        }
        if replacement_missing {
            warn!(
                anchor_id = %anchor.id,
                session_id = %session.id,
                range = %anchor.score_range,
                "no replacement anchor available"
            );
            return Err(CalibrationError::NoReplacementAvailable {
                range: anchor.score_range,
                anchor_id: anchor.id,
            });
        }

        Ok(anchor)
    }
}
