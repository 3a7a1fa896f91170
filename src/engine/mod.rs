use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::archive::HistoricalArchive;
use crate::config::EngineConfig;
use crate::error::{CalibrationError, EngineResult};
use crate::identity::IdentityProvider;
use crate::model::{CalibrationSession, SessionStatus};
use crate::notify::{CalibrationEvent, NotificationSink};

mod anchors;
mod lifecycle;
mod results;
mod sampler;
mod scoring;
pub mod stats;

pub struct CalibrationEngine {
    connection: Connection,
    archive: Box<dyn HistoricalArchive>,
    identity: Box<dyn IdentityProvider>,
    notifier: Box<dyn NotificationSink>,
    config: EngineConfig,
    rng: ChaCha8Rng,
}

impl CalibrationEngine {
    pub fn new(
        connection: Connection,
        archive: Box<dyn HistoricalArchive>,
        identity: Box<dyn IdentityProvider>,
        notifier: Box<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            connection,
            archive,
            identity,
            notifier,
            config,
            rng,
        }
    }

    fn publish(&self, event: CalibrationEvent) {
        debug!(event = ?event, "publishing calibration event");
        if let Err(err) = self.notifier.notify(&event) {
            warn!(error = %err, event = ?event, "notification delivery failed");
        }
    }
}

// Stored ids never come from the seeded rng; a seed only fixes selection.
fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn require_status(
    session: &CalibrationSession,
    expected: &[SessionStatus],
    action: &str,
) -> EngineResult<()> {
    if expected.contains(&session.status) {
        return Ok(());
    }
    Err(CalibrationError::ValidationState(format!(
        "cannot {action} while session {} is {}",
        session.id, session.status
    )))
}

/// Applies a forward lifecycle edge; a session already past `from` is left
/// untouched and `false` is returned.
fn advance_status(
    connection: &Connection,
    session_id: &str,
    from: SessionStatus,
    to: SessionStatus,
    at: DateTime<Utc>,
) -> EngineResult<bool> {
    if !from.can_advance_to(to) {
        return Err(CalibrationError::ValidationState(format!(
            "illegal session transition {from} -> {to}"
        )));
    }

    let stamp_column = match to {
        SessionStatus::ScoringOpen => Some("scoring_opened_at"),
        SessionStatus::ScoringClosed => Some("scoring_closed_at"),
        SessionStatus::Completed => Some("results_published_at"),
        _ => None,
    };
    let changed =
        crate::db::update_session_status_if(connection, session_id, from, to, stamp_column, at)?;
    if changed {
        debug!(session_id = %session_id, from = %from, to = %to, "session transitioned");
    }
    Ok(changed)
}
