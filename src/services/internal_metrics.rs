use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::services::staging::StagedTransaction;

const ZERO_EPSILON: f64 = 1e-9;

/// Management-company view of one room-month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalMetricsRow {
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub room_id: Uuid,
    pub org_name: Option<String>,
    pub building_name: Option<String>,
    pub unit_name: Option<String>,
    pub room_name: Option<String>,
    pub period_month: NaiveDate,
    pub gross_revenue: f64,
    pub landlord_revenue: f64,
    pub fee_income: f64,
    pub management_fee: f64,
    pub management_company_total_revenue: f64,
    pub take_rate: f64,
}

#[derive(Default)]
struct RoomMonthTotals {
    gross: f64,
    landlord: f64,
    fees: f64,
}

pub fn build_internal_metrics(
    staged: &[StagedTransaction],
    management_fee_rate: f64,
) -> Vec<InternalMetricsRow> {
    let mut groups: BTreeMap<(Uuid, NaiveDate), (RoomMonthTotals, &StagedTransaction)> =
        BTreeMap::new();
    for row in staged {
        let Some(room_id) = row.room_id else {
            continue;
        };
        let (totals, _) = groups
            .entry((room_id, row.month))
            .or_insert_with(|| (RoomMonthTotals::default(), row));
        totals.gross += row.amount;
        if row.is_landlord_revenue {
            totals.landlord += row.amount;
        }
        if row.is_management_fee_eligible {
            totals.fees += row.amount;
        }
    }

    groups
        .into_iter()
        .map(|((room_id, period_month), (totals, sample))| {
            let management_fee = totals.landlord * management_fee_rate;
            let management_company_total_revenue = management_fee + totals.fees;
            InternalMetricsRow {
                org_id: sample.org_id,
                building_id: sample.building_id,
                unit_id: sample.unit_id,
                room_id,
                org_name: sample.org_name.clone(),
                building_name: sample.building_name.clone(),
                unit_name: sample.unit_name.clone(),
                room_name: sample.room_name.clone(),
                period_month,
                gross_revenue: totals.gross,
                landlord_revenue: totals.landlord,
                fee_income: totals.fees,
                management_fee,
                management_company_total_revenue,
                take_rate: safe_divide(management_company_total_revenue, totals.gross),
            }
        })
        .collect()
}

/// Zero when the denominator is zero or within `1e-9` of it.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if !denominator.is_finite() || denominator.abs() < ZERO_EPSILON {
        return 0.0;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{build_internal_metrics, safe_divide};
    use crate::services::staging::StagedTransaction;

    fn staged(room_id: Option<Uuid>, amount: f64, landlord: bool, fee: bool) -> StagedTransaction {
        StagedTransaction {
            transaction_id: Uuid::new_v4(),
            month: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
            amount,
            account_name: None,
            revenue_class: None,
            entitlement: None,
            is_landlord_revenue: landlord,
            is_management_fee_eligible: fee,
            org_id: None,
            building_id: None,
            unit_id: Some(Uuid::nil()),
            room_id,
            org_name: None,
            building_name: None,
            unit_name: None,
            room_name: Some("Room A".to_string()),
            agreement_type: "management".to_string(),
            bedrooms: Some(2),
        }
    }

    #[test]
    fn splits_room_month_revenue() {
        let room = Uuid::new_v4();
        let rows = build_internal_metrics(
            &[
                staged(Some(room), 1000.0, true, false),
                staged(Some(room), 100.0, false, true),
            ],
            0.10,
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.gross_revenue, 1100.0);
        assert_eq!(row.landlord_revenue, 1000.0);
        assert_eq!(row.fee_income, 100.0);
        assert_eq!(row.management_fee, 100.0);
        assert_eq!(row.management_company_total_revenue, 200.0);
        assert!((row.take_rate - 200.0 / 1100.0).abs() < 1e-12);
        assert_eq!(row.room_name.as_deref(), Some("Room A"));
    }

    #[test]
    fn unentitled_revenue_counts_toward_gross_only() {
        let room = Uuid::new_v4();
        let rows = build_internal_metrics(&[staged(Some(room), 40.0, false, false)], 0.10);
        assert_eq!(rows[0].gross_revenue, 40.0);
        assert_eq!(rows[0].landlord_revenue, 0.0);
        assert_eq!(rows[0].fee_income, 0.0);
        assert_eq!(rows[0].take_rate, 0.0);
    }

    #[test]
    fn zero_gross_has_zero_take_rate() {
        let room = Uuid::new_v4();
        let rows = build_internal_metrics(&[staged(Some(room), 0.0, false, true)], 0.10);
        assert_eq!(rows[0].take_rate, 0.0);
        assert_eq!(safe_divide(5.0, 1e-10), 0.0);
        assert_eq!(safe_divide(5.0, 2.0), 2.5);
    }

    #[test]
    fn transactions_without_room_are_left_out() {
        let rows = build_internal_metrics(&[staged(None, 500.0, true, false)], 0.10);
        assert!(rows.is_empty());
    }
}
