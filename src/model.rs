use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! text_column {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_str()?;
                raw.parse().map_err(|err: String| FromSqlError::Other(err.into()))
            }
        }
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    AnchorPending,
    ScoringOpen,
    ScoringClosed,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const ACTIVE: [SessionStatus; 4] = [
        Self::Scheduled,
        Self::AnchorPending,
        Self::ScoringOpen,
        Self::ScoringClosed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::AnchorPending => "ANCHOR_PENDING",
            Self::ScoringOpen => "SCORING_OPEN",
            Self::ScoringClosed => "SCORING_CLOSED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        match (self, next) {
            (Self::Scheduled, Self::AnchorPending) => true,
            (Self::AnchorPending, Self::ScoringOpen) => true,
            (Self::ScoringOpen, Self::ScoringClosed) => true,
            (Self::ScoringClosed, Self::Completed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "SCHEDULED" => Ok(Self::Scheduled),
            "ANCHOR_PENDING" => Ok(Self::AnchorPending),
            "SCORING_OPEN" => Ok(Self::ScoringOpen),
            "SCORING_CLOSED" => Ok(Self::ScoringClosed),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

text_column!(SessionStatus);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Rater,
    QaTl,
    AmSdm,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rater => "RATER",
            Self::QaTl => "QA_TL",
            Self::AmSdm => "AM_SDM",
        }
    }

    pub fn is_approver(self) -> bool {
        matches!(self, Self::QaTl | Self::AmSdm)
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "RATER" => Ok(Self::Rater),
            "QA_TL" => Ok(Self::QaTl),
            "AM_SDM" => Ok(Self::AmSdm),
            other => Err(format!("unknown participant role: {other}")),
        }
    }
}

text_column!(ParticipantRole);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
    Reproducibility,
    Repeatability,
    Accuracy,
}

impl TicketType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reproducibility => "REPRODUCIBILITY",
            Self::Repeatability => "REPEATABILITY",
            Self::Accuracy => "ACCURACY",
        }
    }
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "REPRODUCIBILITY" => Ok(Self::Reproducibility),
            "REPEATABILITY" => Ok(Self::Repeatability),
            "ACCURACY" => Ok(Self::Accuracy),
            other => Err(format!("unknown ticket type: {other}")),
        }
    }
}

text_column!(TicketType);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreRange {
    High,
    Mid,
    Low,
}

impl ScoreRange {
    pub const ALL: [ScoreRange; 3] = [Self::High, Self::Mid, Self::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Mid => "MID",
            Self::Low => "LOW",
        }
    }
}

impl FromStr for ScoreRange {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "HIGH" => Ok(Self::High),
            "MID" => Ok(Self::Mid),
            "LOW" => Ok(Self::Low),
            other => Err(format!("unknown score range: {other}")),
        }
    }
}

text_column!(ScoreRange);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    PendingValidation,
    Validated,
    Rejected,
    NonMatching,
}

impl AnchorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingValidation => "PENDING_VALIDATION",
            Self::Validated => "VALIDATED",
            Self::Rejected => "REJECTED",
            Self::NonMatching => "NON_MATCHING",
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::PendingValidation | Self::Validated)
    }
}

impl FromStr for AnchorStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "PENDING_VALIDATION" => Ok(Self::PendingValidation),
            "VALIDATED" => Ok(Self::Validated),
            "REJECTED" => Ok(Self::Rejected),
            "NON_MATCHING" => Ok(Self::NonMatching),
            other => Err(format!("unknown anchor status: {other}")),
        }
    }
}

text_column!(AnchorStatus);

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub min: f64,
    pub max: f64,
}

impl RangeBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRanges {
    pub high: RangeBounds,
    pub mid: RangeBounds,
    pub low: RangeBounds,
}

impl ScoreRanges {
    pub fn bounds(&self, range: ScoreRange) -> RangeBounds {
        match range {
            ScoreRange::High => self.high,
            ScoreRange::Mid => self.mid,
            ScoreRange::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSession {
    pub id: String,
    pub campaign_id: String,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub reproducibility_ticket_count: u32,
    pub repeatability_ticket_count: u32,
    pub score_ranges: ScoreRanges,
    pub target_rnr: f64,
    pub target_accuracy: f64,
    pub avg_reproducibility: Option<f64>,
    pub avg_repeatability: Option<f64>,
    pub total_range: Option<f64>,
    pub calculated_rnr: Option<f64>,
    pub avg_accuracy_gap: Option<f64>,
    pub scoring_opened_at: Option<DateTime<Utc>>,
    pub scoring_closed_at: Option<DateTime<Utc>>,
    pub results_published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationParticipant {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub has_completed_scoring: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationTicket {
    pub id: String,
    pub session_id: String,
    pub ticket_type: TicketType,
    pub group_id: Option<String>,
    pub pass_number: Option<u8>,
    pub audit_id: String,
    pub ticket_ref: Option<String>,
    pub agent_name: Option<String>,
    pub metadata: Value,
    pub anchor_id: Option<String>,
    pub anchor_score: Option<f64>,
    pub score_range: Option<ScoreRange>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationAnchor {
    pub id: String,
    pub session_id: String,
    pub score_range: ScoreRange,
    pub audit_id: String,
    pub ticket_ref: Option<String>,
    pub agent_name: Option<String>,
    pub metadata: Value,
    pub score: f64,
    pub qa_tl_approved: Option<bool>,
    pub qa_tl_approver_id: Option<String>,
    pub qa_tl_approved_at: Option<DateTime<Utc>>,
    pub am_sdm_approved: Option<bool>,
    pub am_sdm_approver_id: Option<String>,
    pub am_sdm_approved_at: Option<DateTime<Utc>>,
    pub status: AnchorStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CalibrationAnchor {
    pub fn decision_for(&self, role: ParticipantRole) -> Option<bool> {
        match role {
            ParticipantRole::QaTl => self.qa_tl_approved,
            ParticipantRole::AmSdm => self.am_sdm_approved,
            ParticipantRole::Rater => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationScore {
    pub id: String,
    pub session_id: String,
    pub ticket_id: String,
    pub participant_id: String,
    pub total_score: f64,
    pub score_details: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One computed snapshot. `user_id` is `None` for the session-level row;
/// per-rater rows only carry accuracy figures.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationResult {
    pub id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub avg_reproducibility: Option<f64>,
    pub avg_repeatability: Option<f64>,
    pub total_range: Option<f64>,
    pub calculated_rnr: Option<f64>,
    pub avg_accuracy_gap: Option<f64>,
    pub passed_rnr: Option<bool>,
    pub passed_accuracy: bool,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub campaign_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub reproducibility_ticket_count: u32,
    pub repeatability_ticket_count: u32,
    pub score_ranges: ScoreRanges,
    pub target_rnr: f64,
    pub target_accuracy: f64,
    pub raters: Vec<String>,
    pub qa_team_leads: Vec<String>,
    pub am_sdm_approvers: Vec<String>,
}

impl NewSession {
    pub fn participants(&self) -> impl Iterator<Item = (&str, ParticipantRole)> {
        let raters = self
            .raters
            .iter()
            .map(|user| (user.as_str(), ParticipantRole::Rater));
        let leads = self
            .qa_team_leads
            .iter()
            .map(|user| (user.as_str(), ParticipantRole::QaTl));
        let approvers = self
            .am_sdm_approvers
            .iter()
            .map(|user| (user.as_str(), ParticipantRole::AmSdm));
        raters.chain(leads).chain(approvers)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: CalibrationSession,
    pub participants: Vec<CalibrationParticipant>,
    pub tickets: Vec<CalibrationTicket>,
    pub anchors: Vec<CalibrationAnchor>,
    pub scores: Vec<CalibrationScore>,
    pub results: Vec<CalibrationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RandomizeSummary {
    pub session_id: String,
    pub reproducibility_tickets: usize,
    pub repeatability_tickets: usize,
    pub anchors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResultSummary {
    pub session: CalibrationResult,
    pub raters: Vec<CalibrationResult>,
}
