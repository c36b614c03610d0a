use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One settled delivery inside a day record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsLine {
    pub delivery_id: Uuid,
    pub amount: f64,
    pub distance_km: f64,
    pub completed_at: DateTime<Utc>,
}

/// Accumulated earnings for one courier on one calendar day. Created lazily
/// on the first completed delivery of that day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsRecord {
    pub courier_id: Uuid,
    pub date: NaiveDate,
    pub deliveries: Vec<EarningsLine>,
    pub total_amount: f64,
    pub total_deliveries: u32,
    pub total_distance_km: f64,
}

impl EarningsRecord {
    pub fn empty(courier_id: Uuid, date: NaiveDate) -> Self {
        Self {
            courier_id,
            date,
            deliveries: Vec::new(),
            total_amount: 0.0,
            total_deliveries: 0,
            total_distance_km: 0.0,
        }
    }
}

/// Fold of the day records in a date range, for the reporting endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EarningsSummary {
    pub courier_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_amount: f64,
    pub total_deliveries: u32,
    pub total_distance_km: f64,
    pub days: Vec<EarningsRecord>,
}
