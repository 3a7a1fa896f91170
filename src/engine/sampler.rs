use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rusqlite::TransactionBehavior;
use tracing::info;

use super::{CalibrationEngine, advance_status, new_id, require_status};
use crate::archive::{ArchiveQuery, ArchiveRecord};
use crate::db;
use crate::error::{CalibrationError, EngineResult};
use crate::model::{
    AnchorStatus, CalibrationAnchor, CalibrationTicket, RandomizeSummary, ScoreRange,
    SessionStatus, TicketType,
};
use crate::notify::CalibrationEvent;

pub(super) fn shuffle_and_take<T>(
    mut pool: Vec<T>,
    count: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<T>, usize> {
    if pool.len() < count {
        return Err(pool.len());
    }
    pool.shuffle(rng);
    pool.truncate(count);
    Ok(pool)
}

pub(super) fn draw_pool(
    pool: &[ArchiveRecord],
    count: usize,
    rng: &mut ChaCha8Rng,
) -> EngineResult<Vec<ArchiveRecord>> {
    shuffle_and_take(pool.to_vec(), count, rng).map_err(|available| {
        CalibrationError::InsufficientPool {
            requested: count,
            available,
        }
    })
}

pub(super) fn draw_range(
    range: ScoreRange,
    candidates: Vec<ArchiveRecord>,
    count: usize,
    rng: &mut ChaCha8Rng,
) -> EngineResult<Vec<ArchiveRecord>> {
    shuffle_and_take(candidates, count, rng).map_err(|available| {
        CalibrationError::InsufficientRange {
            range,
            requested: count,
            available,
        }
    })
}

pub(super) fn ticket_from_record(
    id: String,
    session_id: &str,
    ticket_type: TicketType,
    record: &ArchiveRecord,
) -> CalibrationTicket {
    CalibrationTicket {
        id,
        session_id: session_id.to_string(),
        ticket_type,
        group_id: None,
        pass_number: None,
        audit_id: record.id.clone(),
        ticket_ref: record.external_ticket_ref.clone(),
        agent_name: record.agent_name.clone(),
        metadata: record.metadata.clone(),
        anchor_id: None,
        anchor_score: None,
        score_range: None,
        created_at: Utc::now(),
    }
}

pub(super) fn anchor_from_record(
    id: String,
    session_id: &str,
    range: ScoreRange,
    record: &ArchiveRecord,
) -> CalibrationAnchor {
    CalibrationAnchor {
        id,
        session_id: session_id.to_string(),
        score_range: range,
        audit_id: record.id.clone(),
        ticket_ref: record.external_ticket_ref.clone(),
        agent_name: record.agent_name.clone(),
        metadata: record.metadata.clone(),
        score: record.score,
        qa_tl_approved: None,
        qa_tl_approver_id: None,
        qa_tl_approved_at: None,
        am_sdm_approved: None,
        am_sdm_approver_id: None,
        am_sdm_approved_at: None,
        status: AnchorStatus::PendingValidation,
        rejection_reason: None,
        created_at: Utc::now(),
    }
}

impl CalibrationEngine {
    pub fn randomize(&mut self, session_id: &str) -> EngineResult<RandomizeSummary> {
        let Self {
            connection,
            archive,
            config,
            rng,
            ..
        } = self;

        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = db::load_session(&tx, session_id)?;
        require_status(&session, &[SessionStatus::Scheduled], "randomize tickets")?;

        let cutoff = Utc::now() - Duration::days(config.pool_lookback_days);
        let pool_query =
            ArchiveQuery::released_pool(&session.campaign_id, cutoff, config.pool_candidate_cap);
        let pool = archive.query(&pool_query)?;
        info!(session_id = %session.id, pool = pool.len(), "loaded sampling pool");

        let reproducibility =
            draw_pool(&pool, session.reproducibility_ticket_count as usize, rng)?;
        let repeatability = draw_pool(&pool, session.repeatability_ticket_count as usize, rng)?;

        let mut anchor_draws = Vec::with_capacity(ScoreRange::ALL.len());
        for range in ScoreRange::ALL {
            let mut range_query = pool_query
                .clone()
                .in_range(session.score_ranges.bounds(range));
            range_query.limit = config.anchor_candidate_cap;
            let candidates = archive.query(&range_query)?;
            let drawn = draw_range(range, candidates, config.anchors_per_range, rng)?;
            anchor_draws.push((range, drawn));
        }

        for record in &reproducibility {
            let ticket =
                ticket_from_record(new_id(), &session.id, TicketType::Reproducibility, record);
            db::insert_ticket(&tx, &ticket)?;
        }

        let mut repeatability_tickets = 0;
        for record in &repeatability {
            let group_id = new_id();
            for pass_number in [1_u8, 2] {
                let mut ticket =
                    ticket_from_record(new_id(), &session.id, TicketType::Repeatability, record);
                ticket.group_id = Some(group_id.clone());
                ticket.pass_number = Some(pass_number);
                db::insert_ticket(&tx, &ticket)?;
                repeatability_tickets += 1;
            }
        }

        let mut anchors = 0;
        for (range, records) in &anchor_draws {
            for record in records {
                let anchor = anchor_from_record(new_id(), &session.id, *range, record);
                db::insert_anchor(&tx, &anchor)?;
                anchors += 1;
            }
        }

        advance_status(
            &tx,
            &session.id,
            SessionStatus::Scheduled,
            SessionStatus::AnchorPending,
            Utc::now(),
        )?;
        tx.commit()?;

        info!(
            session_id = %session.id,
            reproducibility_tickets = reproducibility.len(),
            repeatability_tickets,
            anchors,
            "session randomized"
        );

        let summary = RandomizeSummary {
            session_id: session.id.clone(),
            reproducibility_tickets: reproducibility.len(),
            repeatability_tickets,
            anchors,
        };
        self.publish(CalibrationEvent::AnchorsPendingValidation {
            session_id: session.id,
            pending: anchors,
        });
        Ok(summary)
    }
}
