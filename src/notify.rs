use anyhow::Result;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    AnchorsPendingValidation {
        session_id: String,
        pending: usize,
    },
    ScoringOpened {
        session_id: String,
        accuracy_tickets: usize,
    },
    ResultsPublished {
        session_id: String,
        calculated_rnr: Option<f64>,
        passed_rnr: bool,
        passed_accuracy: bool,
    },
}

pub trait NotificationSink {
    fn notify(&self, event: &CalibrationEvent) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: &CalibrationEvent) -> Result<()> {
        match event {
            CalibrationEvent::AnchorsPendingValidation {
                session_id,
                pending,
            } => info!(session_id = %session_id, pending, "anchors pending validation"),
            CalibrationEvent::ScoringOpened {
                session_id,
                accuracy_tickets,
            } => info!(session_id = %session_id, accuracy_tickets, "scoring opened"),
            CalibrationEvent::ResultsPublished {
                session_id,
                calculated_rnr,
                passed_rnr,
                passed_accuracy,
            } => info!(
                session_id = %session_id,
                calculated_rnr = ?calculated_rnr,
                passed_rnr,
                passed_accuracy,
                "results published"
            ),
        }
        Ok(())
    }
}
