use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    repository::{
        models::{KpiFact, KpiFactFilter, KpiName},
        KpiStore,
    },
    services::internal_metrics::safe_divide,
};

/// Portfolio-wide internal KPIs for one month, summed over room-level facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InternalSummary {
    pub period_month: Option<NaiveDate>,
    pub rooms: usize,
    pub gross_revenue: f64,
    pub landlord_revenue: f64,
    pub fee_income: f64,
    pub management_fee: f64,
    pub management_company_total_revenue: f64,
    pub take_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartnerUnitSummary {
    pub unit_id: Uuid,
    pub unit_name: Option<String>,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub total_revenue: f64,
    pub management_fee: f64,
    pub total_opex: Option<f64>,
    pub noi: f64,
}

pub async fn available_months<S: KpiStore + ?Sized>(store: &S) -> AppResult<Vec<NaiveDate>> {
    store.fetch_transaction_months().await
}

pub async fn latest_computed_month<S: KpiStore + ?Sized>(
    store: &S,
) -> AppResult<Option<NaiveDate>> {
    Ok(store.fetch_kpi_months().await?.into_iter().max())
}

pub async fn internal_summary<S: KpiStore + ?Sized>(
    store: &S,
    period_month: NaiveDate,
) -> AppResult<InternalSummary> {
    let facts = store
        .fetch_kpi_facts(&KpiFactFilter {
            kpi_names: KpiName::INTERNAL.to_vec(),
            period_month: Some(period_month),
            ..KpiFactFilter::default()
        })
        .await?;
    let mut summary = summarize_internal(&facts);
    summary.period_month = Some(period_month);
    Ok(summary)
}

pub async fn partner_summary<S: KpiStore + ?Sized>(
    store: &S,
    period_month: NaiveDate,
    org_id: Option<Uuid>,
    building_id: Option<Uuid>,
) -> AppResult<Vec<PartnerUnitSummary>> {
    let filter = KpiFactFilter {
        kpi_names: KpiName::PARTNER.to_vec(),
        period_month: Some(period_month),
        org_id,
        building_id,
    };
    let (facts, hierarchy) =
        tokio::try_join!(store.fetch_kpi_facts(&filter), store.fetch_hierarchy())?;
    let unit_names = hierarchy
        .units
        .iter()
        .map(|unit| (unit.id, unit.name.as_str()))
        .collect::<HashMap<_, _>>();
    Ok(summarize_partner(&facts, &unit_names))
}

/// Take rate is recomputed from the sums, never averaged.
pub fn summarize_internal(facts: &[KpiFact]) -> InternalSummary {
    let mut summary = InternalSummary::default();
    let mut rooms = BTreeSet::new();
    for fact in facts.iter().filter(|fact| fact.room_id.is_some()) {
        rooms.insert(fact.room_id);
        match fact.kpi_name {
            KpiName::InternalGrossRevenue => summary.gross_revenue += fact.value,
            KpiName::InternalLandlordRevenue => summary.landlord_revenue += fact.value,
            KpiName::InternalFeeIncome => summary.fee_income += fact.value,
            KpiName::InternalManagementFee => summary.management_fee += fact.value,
            KpiName::InternalManagementCompanyTotalRevenue => {
                summary.management_company_total_revenue += fact.value
            }
            _ => {}
        }
    }
    summary.rooms = rooms.len();
    summary.take_rate = if summary.gross_revenue > 0.0 {
        safe_divide(
            summary.management_company_total_revenue,
            summary.gross_revenue,
        )
    } else {
        0.0
    };
    summary
}

/// Per-unit partner KPIs, highest total revenue first.
pub fn summarize_partner(
    facts: &[KpiFact],
    unit_names: &HashMap<Uuid, &str>,
) -> Vec<PartnerUnitSummary> {
    let mut by_unit: BTreeMap<Uuid, PartnerUnitSummary> = BTreeMap::new();
    for fact in facts {
        let Some(unit_id) = fact.unit_id else {
            continue;
        };
        let entry = by_unit.entry(unit_id).or_insert_with(|| PartnerUnitSummary {
            unit_id,
            unit_name: unit_names.get(&unit_id).map(|name| name.to_string()),
            org_id: fact.org_id,
            building_id: fact.building_id,
            total_revenue: 0.0,
            management_fee: 0.0,
            total_opex: None,
            noi: 0.0,
        });
        match fact.kpi_name {
            KpiName::PartnerTotalRevenue => entry.total_revenue += fact.value,
            KpiName::PartnerManagementFee => entry.management_fee += fact.value,
            KpiName::PartnerTotalOpex => {
                entry.total_opex = Some(entry.total_opex.unwrap_or(0.0) + fact.value)
            }
            KpiName::PartnerNoi => entry.noi += fact.value,
            _ => {}
        }
    }

    let mut out = by_unit.into_values().collect::<Vec<_>>();
    out.sort_by(|left, right| right.total_revenue.total_cmp(&left.total_revenue));
    out
}
