use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use super::stats;
use super::{CalibrationEngine, advance_status, new_id, require_status};
use crate::db::{self, SessionMetrics};
use crate::error::EngineResult;
use crate::model::{
    CalibrationParticipant, CalibrationResult, CalibrationScore, CalibrationSession,
    CalibrationTicket, ParticipantRole, SessionResultSummary, SessionStatus, TicketType,
};
use crate::notify::CalibrationEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct RaterAccuracy {
    pub user_id: String,
    pub avg_accuracy_gap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionComputation {
    pub avg_reproducibility: f64,
    pub avg_repeatability: f64,
    pub total_range: f64,
    pub calculated_rnr: Option<f64>,
    pub avg_accuracy_gap: Option<f64>,
    pub raters: Vec<RaterAccuracy>,
}

pub fn compute_session_metrics(
    tickets: &[CalibrationTicket],
    scores: &[CalibrationScore],
    participants: &[CalibrationParticipant],
) -> SessionComputation {
    let mut by_ticket = HashMap::<&str, Vec<&CalibrationScore>>::new();
    let mut by_pair = HashMap::<(&str, &str), f64>::new();
    for score in scores {
        by_ticket
            .entry(score.ticket_id.as_str())
            .or_default()
            .push(score);
        by_pair.insert(
            (score.ticket_id.as_str(), score.participant_id.as_str()),
            score.total_score,
        );
    }

    let reproducibility_sets = tickets
        .iter()
        .filter(|ticket| ticket.ticket_type == TicketType::Reproducibility)
        .map(|ticket| {
            by_ticket
                .get(ticket.id.as_str())
                .map(|entries| entries.iter().map(|score| score.total_score).collect())
                .unwrap_or_default()
        })
        .collect::<Vec<Vec<f64>>>();
    let avg_reproducibility = stats::reproducibility(&reproducibility_sets);

    let mut groups = BTreeMap::<&str, [Option<&str>; 2]>::new();
    for ticket in tickets
        .iter()
        .filter(|ticket| ticket.ticket_type == TicketType::Repeatability)
    {
        let (Some(group_id), Some(pass_number @ 1..=2)) = (&ticket.group_id, ticket.pass_number)
        else {
            continue;
        };
        groups.entry(group_id.as_str()).or_default()[usize::from(pass_number - 1)] =
            Some(ticket.id.as_str());
    }

    let per_rater_deltas = participants
        .iter()
        .map(|participant| {
            groups
                .values()
                .filter_map(|passes| {
                    let [Some(first), Some(second)] = passes else {
                        return None;
                    };
                    let first = by_pair.get(&(*first, participant.id.as_str()))?;
                    let second = by_pair.get(&(*second, participant.id.as_str()))?;
                    Some(stats::pass_delta(*first, *second))
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let avg_repeatability = stats::repeatability(&per_rater_deltas);

    let all_scores = scores
        .iter()
        .map(|score| score.total_score)
        .collect::<Vec<_>>();
    let total_range = stats::total_range(&all_scores);
    let calculated_rnr = stats::rnr_percentage(avg_reproducibility, avg_repeatability, total_range);

    let accuracy_pairs = tickets
        .iter()
        .filter(|ticket| ticket.ticket_type == TicketType::Accuracy)
        .filter_map(|ticket| ticket.anchor_score.map(|anchor| (ticket, anchor)))
        .flat_map(|(ticket, anchor)| {
            by_ticket
                .get(ticket.id.as_str())
                .into_iter()
                .flatten()
                .map(move |score| (score.participant_id.as_str(), score.total_score, anchor))
        })
        .collect::<Vec<_>>();
    let session_pairs = accuracy_pairs
        .iter()
        .map(|(_, score, anchor)| (*score, *anchor))
        .collect::<Vec<_>>();
    let avg_accuracy_gap = stats::accuracy_gap(&session_pairs);

    let raters = participants
        .iter()
        .filter(|participant| participant.role == ParticipantRole::Rater)
        .map(|participant| {
            let pairs = accuracy_pairs
                .iter()
                .filter(|(participant_id, _, _)| *participant_id == participant.id)
                .map(|(_, score, anchor)| (*score, *anchor))
                .collect::<Vec<_>>();
            RaterAccuracy {
                user_id: participant.user_id.clone(),
                avg_accuracy_gap: stats::accuracy_gap(&pairs),
            }
        })
        .collect();

    SessionComputation {
        avg_reproducibility,
        avg_repeatability,
        total_range,
        calculated_rnr,
        avg_accuracy_gap,
        raters,
    }
}

pub(super) fn persist_results(
    connection: &Connection,
    session: &CalibrationSession,
    at: DateTime<Utc>,
) -> EngineResult<SessionResultSummary> {
    let tickets = db::load_tickets(connection, &session.id)?;
    let scores = db::load_scores(connection, &session.id)?;
    let participants = db::load_participants(connection, &session.id)?;
    let computed = compute_session_metrics(&tickets, &scores, &participants);

    let session_row = CalibrationResult {
        id: new_id(),
        session_id: session.id.clone(),
        user_id: None,
        avg_reproducibility: Some(computed.avg_reproducibility),
        avg_repeatability: Some(computed.avg_repeatability),
        total_range: Some(computed.total_range),
        calculated_rnr: computed.calculated_rnr,
        avg_accuracy_gap: computed.avg_accuracy_gap,
        passed_rnr: Some(stats::passes_target(
            computed.calculated_rnr,
            session.target_rnr,
        )),
        passed_accuracy: stats::passes_target(computed.avg_accuracy_gap, session.target_accuracy),
        calculated_at: at,
    };
    db::insert_result(connection, &session_row)?;

    let mut rater_rows = Vec::with_capacity(computed.raters.len());
    for rater in &computed.raters {
        let row = CalibrationResult {
            id: new_id(),
            session_id: session.id.clone(),
            user_id: Some(rater.user_id.clone()),
            avg_reproducibility: None,
            avg_repeatability: None,
            total_range: None,
            calculated_rnr: None,
            avg_accuracy_gap: rater.avg_accuracy_gap,
            passed_rnr: None,
            passed_accuracy: stats::passes_target(rater.avg_accuracy_gap, session.target_accuracy),
            calculated_at: at,
        };
        db::insert_result(connection, &row)?;
        rater_rows.push(row);
    }

    db::update_session_metrics(
        connection,
        &session.id,
        &SessionMetrics {
            avg_reproducibility: computed.avg_reproducibility,
            avg_repeatability: computed.avg_repeatability,
            total_range: computed.total_range,
            calculated_rnr: computed.calculated_rnr,
            avg_accuracy_gap: computed.avg_accuracy_gap,
        },
        at,
    )?;

    info!(
        session_id = %session.id,
        avg_reproducibility = computed.avg_reproducibility,
        avg_repeatability = computed.avg_repeatability,
        total_range = computed.total_range,
        calculated_rnr = ?computed.calculated_rnr,
        avg_accuracy_gap = ?computed.avg_accuracy_gap,
        rater_rows = rater_rows.len(),
        "calibration results computed"
    );

    Ok(SessionResultSummary {
        session: session_row,
        raters: rater_rows,
    })
}

impl CalibrationEngine {
    pub fn calculate_results(&mut self, session_id: &str) -> EngineResult<SessionResultSummary> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let session = db::load_session(&tx, session_id)?;
        require_status(
            &session,
            &[SessionStatus::ScoringClosed, SessionStatus::Completed],
            "calculate results",
        )?;

        let now = Utc::now();
        let summary = persist_results(&tx, &session, now)?;
        if !advance_status(
            &tx,
            &session.id,
            SessionStatus::ScoringClosed,
            SessionStatus::Completed,
            now,
        )? {
            db::touch_results_published(&tx, &session.id, now)?;
        }
        tx.commit()?;

        self.publish(CalibrationEvent::ResultsPublished {
            session_id: session.id,
            calculated_rnr: summary.session.calculated_rnr,
            passed_rnr: summary.session.passed_rnr.unwrap_or(false),
            passed_accuracy: summary.session.passed_accuracy,
        });
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn participant(id: &str, role: ParticipantRole) -> CalibrationParticipant {
        CalibrationParticipant {
            id: format!("p-{id}"),
            session_id: "s".to_string(),
            user_id: id.to_string(),
            role,
            has_completed_scoring: false,
            completed_at: None,
        }
    }

    fn ticket(id: &str, ticket_type: TicketType) -> CalibrationTicket {
        CalibrationTicket {
            id: id.to_string(),
            session_id: "s".to_string(),
            ticket_type,
            group_id: None,
            pass_number: None,
            audit_id: format!("audit-{id}"),
            ticket_ref: None,
            agent_name: None,
            metadata: json!({}),
            anchor_id: None,
            anchor_score: None,
            score_range: None,
            created_at: Utc::now(),
        }
    }

    fn pass(id: &str, group: &str, pass_number: u8) -> CalibrationTicket {
        let mut ticket = ticket(id, TicketType::Repeatability);
        ticket.group_id = Some(group.to_string());
        ticket.pass_number = Some(pass_number);
        ticket
    }

    fn anchored(id: &str, anchor_score: f64) -> CalibrationTicket {
        let mut ticket = ticket(id, TicketType::Accuracy);
        ticket.anchor_score = Some(anchor_score);
        ticket
    }

    fn score(ticket_id: &str, user: &str, total_score: f64) -> CalibrationScore {
        CalibrationScore {
            id: format!("{ticket_id}-{user}"),
            session_id: "s".to_string(),
            ticket_id: ticket_id.to_string(),
            participant_id: format!("p-{user}"),
            total_score,
            score_details: json!(null),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn metrics_follow_reference_example() {
        let participants = vec![
            participant("r1", ParticipantRole::Rater),
            participant("r2", ParticipantRole::Rater),
            participant("r3", ParticipantRole::Rater),
        ];
        let tickets = vec![
            ticket("rep-a", TicketType::Reproducibility),
            pass("g1-1", "g1", 1),
            pass("g1-2", "g1", 2),
        ];
        let scores = vec![
            score("rep-a", "r1", 90.0),
            score("rep-a", "r2", 92.0),
            score("rep-a", "r3", 88.0),
            score("g1-1", "r1", 85.0),
            score("g1-2", "r1", 90.0),
            score("g1-1", "r2", 75.0),
            score("g1-2", "r3", 95.0),
        ];

        let computed = compute_session_metrics(&tickets, &scores, &participants);
        assert!((computed.avg_reproducibility - 1.63).abs() < 0.005);
        // r2 and r3 only scored one pass each.
        assert_eq!(computed.avg_repeatability, 5.0);
        assert_eq!(computed.total_range, 20.0);
        let rnr = computed.calculated_rnr.expect("range is non-zero");
        let expected = (computed.avg_reproducibility + 5.0) / 20.0 * 100.0;
        assert!((rnr - expected).abs() < 1e-9);
        assert!((rnr - 33.15).abs() < 0.05);
        assert_eq!(computed.avg_accuracy_gap, None);
    }

    #[test]
    fn accuracy_gap_is_session_wide_and_per_rater() {
        let participants = vec![
            participant("r1", ParticipantRole::Rater),
            participant("r2", ParticipantRole::Rater),
            participant("lead", ParticipantRole::QaTl),
        ];
        let tickets = vec![anchored("acc-1", 90.0), anchored("acc-2", 60.0)];
        let scores = vec![
            score("acc-1", "r1", 88.0),
            score("acc-2", "r1", 62.0),
            score("acc-1", "r2", 80.0),
        ];

        let computed = compute_session_metrics(&tickets, &scores, &participants);
        let expected_session = (2.0 + 2.0 + 10.0) / 3.0;
        let gap = computed.avg_accuracy_gap.expect("accuracy scores exist");
        assert!((gap - expected_session).abs() < 1e-9);

        assert_eq!(computed.raters.len(), 2);
        assert_eq!(
            computed.raters[0],
            RaterAccuracy {
                user_id: "r1".to_string(),
                avg_accuracy_gap: Some(2.0)
            }
        );
        assert_eq!(computed.raters[1].avg_accuracy_gap, Some(10.0));
    }

    #[test]
    fn empty_session_yields_guarded_metrics() {
        let participants = vec![participant("r1", ParticipantRole::Rater)];
        let computed = compute_session_metrics(&[], &[], &participants);
        assert_eq!(computed.avg_reproducibility, 0.0);
        assert_eq!(computed.avg_repeatability, 0.0);
        assert_eq!(computed.total_range, 0.0);
        assert_eq!(computed.calculated_rnr, None);
        assert_eq!(computed.raters[0].avg_accuracy_gap, None);
    }
}
