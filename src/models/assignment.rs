use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub rating_score: f64,
    pub recency_score: f64,
}

/// Audit record of one successful dispatch decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub courier_id: Uuid,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub distance_km: f64,
    pub assigned_at: DateTime<Utc>,
}

/// Result of a dispatch attempt. Finding no eligible courier is a legitimate
/// outcome the caller retries later, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned { assignment: Assignment },
    NoCourierAvailable,
}
