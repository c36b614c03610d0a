use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::delivery::Delivery;
use crate::models::earnings::{EarningsLine, EarningsRecord, EarningsSummary};

/// Per-courier, per-calendar-day earnings records. The write side is the
/// settlement hook on delivery completion; everything else is read-only
/// reporting folds.
pub struct EarningsLedger {
    records: DashMap<(Uuid, NaiveDate), EarningsRecord>,
}

impl EarningsLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Append the delivery's earnings to the courier's day record, creating
    /// the record on first use. Idempotent per delivery: a second call with
    /// the same delivery id leaves the totals untouched and returns false.
    pub fn record_completion(&self, delivery: &Delivery) -> bool {
        let (Some(courier_id), Some(delivered_at)) = (delivery.courier_id, delivery.delivered_at)
        else {
            warn!(
                delivery_id = %delivery.id,
                "completion without courier or delivered_at; not recording earnings"
            );
            return false;
        };

        let date = delivered_at.date_naive();
        let mut record = self
            .records
            .entry((courier_id, date))
            .or_insert_with(|| EarningsRecord::empty(courier_id, date));

        if record
            .deliveries
            .iter()
            .any(|line| line.delivery_id == delivery.id)
        {
            debug!(
                delivery_id = %delivery.id,
                courier_id = %courier_id,
                "earnings already recorded; skipping"
            );
            return false;
        }

        record.deliveries.push(EarningsLine {
            delivery_id: delivery.id,
            amount: delivery.driver_earnings,
            distance_km: delivery.distance_km,
            completed_at: delivered_at,
        });
        record.total_amount += delivery.driver_earnings;
        record.total_deliveries += 1;
        record.total_distance_km += delivery.distance_km;
        true
    }

    pub fn day_record(&self, courier_id: Uuid, date: NaiveDate) -> Option<EarningsRecord> {
        self.records
            .get(&(courier_id, date))
            .map(|entry| entry.value().clone())
    }

    /// Fold the courier's day records over an inclusive date range. Reporting
    /// only; day/week/month are just different ranges from the caller.
    pub fn summarize(&self, courier_id: Uuid, from: NaiveDate, to: NaiveDate) -> EarningsSummary {
        let mut days: Vec<EarningsRecord> = self
            .records
            .iter()
            .filter(|entry| {
                let (owner, date) = *entry.key();
                owner == courier_id && date >= from && date <= to
            })
            .map(|entry| entry.value().clone())
            .collect();
        days.sort_by_key(|record| record.date);

        let mut total_amount = 0.0;
        let mut total_deliveries = 0;
        let mut total_distance_km = 0.0;
        for day in &days {
            total_amount += day.total_amount;
            total_deliveries += day.total_deliveries;
            total_distance_km += day.total_distance_km;
        }

        EarningsSummary {
            courier_id,
            from,
            to,
            total_amount,
            total_deliveries,
            total_distance_km,
            days,
        }
    }
}

impl Default for EarningsLedger {
    fn default() -> Self {
        Self::new()
    }
}
