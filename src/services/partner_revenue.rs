use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::services::{opex::UnitOpEx, staging::StagedTransaction};

/// Landlord-facing revenue and NOI for one unit-month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartnerRevenueRow {
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub org_name: Option<String>,
    pub building_name: Option<String>,
    pub unit_name: Option<String>,
    pub period_month: NaiveDate,
    pub room_count: Option<i64>,
    pub total_revenue: f64,
    pub management_fee: f64,
    /// `None` when the unit has no room-count record.
    pub total_opex: Option<f64>,
    pub noi: f64,
}

/// Sums landlord revenue per unit-month and nets fee and opex into NOI.
///
/// Every unit-month present in the staged data gets a row, even when none of its
/// revenue is landlord-entitled. Transactions without a unit are skipped.
pub fn build_partner_revenue(
    staged: &[StagedTransaction],
    unit_opex: &[UnitOpEx],
    management_fee_rate: f64,
) -> Vec<PartnerRevenueRow> {
    let opex_by_unit = unit_opex
        .iter()
        .map(|row| (row.unit_id, row))
        .collect::<HashMap<_, _>>();

    let mut groups: BTreeMap<(Uuid, NaiveDate), (f64, &StagedTransaction)> = BTreeMap::new();
    for row in staged {
        let Some(unit_id) = row.unit_id else {
            continue;
        };
        let landlord_amount = if row.is_landlord_revenue {
            row.amount
        } else {
            0.0
        };
        groups
            .entry((unit_id, row.month))
            .and_modify(|(total, _)| *total += landlord_amount)
            .or_insert((landlord_amount, row));
    }

    groups
        .into_iter()
        .map(|((unit_id, period_month), (total_revenue, sample))| {
            let opex = opex_by_unit.get(&unit_id);
            let management_fee = total_revenue * management_fee_rate;
            let total_opex = opex.map(|row| row.opex.total);
            PartnerRevenueRow {
                org_id: sample.org_id,
                building_id: sample.building_id,
                unit_id,
                org_name: sample.org_name.clone(),
                building_name: sample.building_name.clone(),
                unit_name: sample.unit_name.clone(),
                period_month,
                room_count: opex.map(|row| row.room_count),
                total_revenue,
                management_fee,
                total_opex,
                noi: total_revenue - management_fee - total_opex.unwrap_or(0.0),
            }
        })
        .collect()
}
