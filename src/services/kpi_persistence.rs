use std::collections::BTreeSet;

use futures::future::try_join_all;
use serde::Serialize;

use crate::{
    config::PipelineConfig,
    error::AppResult,
    repository::{
        models::{KpiFact, KpiFactFilter, KpiFactKey, KpiName},
        KpiStore,
    },
    services::{internal_metrics::InternalMetricsRow, partner_revenue::PartnerRevenueRow},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub inserted: u64,
    pub deleted: u64,
    pub dropped_non_finite: usize,
    pub dropped_unkeyed: usize,
}

impl PersistOutcome {
    pub fn absorb(&mut self, other: PersistOutcome) {
        self.inserted += other.inserted;
        self.deleted += other.deleted;
        self.dropped_non_finite += other.dropped_non_finite;
        self.dropped_unkeyed += other.dropped_unkeyed;
    }
}

/// One fact per unit-month per partner KPI. Unknown opex produces no opex fact.
pub fn partner_kpi_facts(rows: &[PartnerRevenueRow], kpi_name: KpiName) -> Vec<KpiFact> {
    rows.iter()
        .filter_map(|row| {
            let value = match kpi_name {
                KpiName::PartnerTotalRevenue => row.total_revenue,
                KpiName::PartnerManagementFee => row.management_fee,
                KpiName::PartnerTotalOpex => row.total_opex?,
                KpiName::PartnerNoi => row.noi,
                _ => return None,
            };
            Some(KpiFact {
                kpi_name,
                value,
                period_month: row.period_month,
                org_id: row.org_id,
                building_id: row.building_id,
                unit_id: Some(row.unit_id),
                room_id: None,
            })
        })
        .collect()
}

/// One fact per room-month per internal KPI.
pub fn internal_kpi_facts(rows: &[InternalMetricsRow], kpi_name: KpiName) -> Vec<KpiFact> {
    rows.iter()
        .filter_map(|row| {
            let value = match kpi_name {
                KpiName::InternalGrossRevenue => row.gross_revenue,
                KpiName::InternalLandlordRevenue => row.landlord_revenue,
                KpiName::InternalFeeIncome => row.fee_income,
                KpiName::InternalManagementFee => row.management_fee,
                KpiName::InternalManagementCompanyTotalRevenue => {
                    row.management_company_total_revenue
                }
                KpiName::InternalTakeRate => row.take_rate,
                _ => return None,
            };
            Some(KpiFact {
                kpi_name,
                value,
                period_month: row.period_month,
                org_id: row.org_id,
                building_id: row.building_id,
                unit_id: row.unit_id,
                room_id: Some(row.room_id),
            })
        })
        .collect()
}

pub async fn persist_partner_kpis<S: KpiStore + ?Sized>(
    store: &S,
    rows: &[PartnerRevenueRow],
    config: &PipelineConfig,
) -> AppResult<PersistOutcome> {
    let mut total = PersistOutcome::default();
    for kpi_name in KpiName::PARTNER {
        total.absorb(persist_kpi(store, kpi_name, partner_kpi_facts(rows, kpi_name), config).await?);
    }
    Ok(total)
}

pub async fn persist_internal_kpis<S: KpiStore + ?Sized>(
    store: &S,
    rows: &[InternalMetricsRow],
    config: &PipelineConfig,
) -> AppResult<PersistOutcome> {
    let mut total = PersistOutcome::default();
    for kpi_name in KpiName::INTERNAL {
        total.absorb(
            persist_kpi(store, kpi_name, internal_kpi_facts(rows, kpi_name), config).await?,
        );
    }
    Ok(total)
}

/// Replaces the stored facts of one KPI with `facts`.
///
/// Deletes are scoped per `(month, room)` or `(month, unit)` key: every key in the new
/// batch plus every key stored for this KPI that the batch no longer produces. Deletes
/// run `delete_batch_size` at a time, inserts go out in `insert_batch_size` chunks.
pub async fn persist_kpi<S: KpiStore + ?Sized>(
    store: &S,
    kpi_name: KpiName,
    facts: Vec<KpiFact>,
    config: &PipelineConfig,
) -> AppResult<PersistOutcome> {
    let mut outcome = PersistOutcome::default();

    let mut batch_keys = BTreeSet::new();
    let mut to_insert = Vec::with_capacity(facts.len());
    for fact in facts {
        let Some(key) = fact.key() else {
            outcome.dropped_unkeyed += 1;
            continue;
        };
        batch_keys.insert(key);
        if fact.value.is_finite() {
            to_insert.push(fact);
        } else {
            outcome.dropped_non_finite += 1;
        }
    }
    if outcome.dropped_unkeyed > 0 {
        tracing::warn!(kpi_name = %kpi_name, dropped = outcome.dropped_unkeyed, "Dropping KPI rows with neither room nor unit");
    }
    if outcome.dropped_non_finite > 0 {
        tracing::debug!(kpi_name = %kpi_name, dropped = outcome.dropped_non_finite, "Dropping non-numeric KPI values");
    }

    let stored = store
        .fetch_kpi_facts(&KpiFactFilter::for_kpi(kpi_name))
        .await?;
    let stale_keys = stored
        .iter()
        .filter_map(KpiFact::key)
        .filter(|key| !batch_keys.contains(key))
        .collect::<BTreeSet<_>>();
    let delete_keys = batch_keys
        .into_iter()
        .chain(stale_keys)
        .collect::<BTreeSet<KpiFactKey>>()
        .into_iter()
        .collect::<Vec<_>>();

    for batch in delete_keys.chunks(config.delete_batch_size.max(1)) {
        let removed = try_join_all(
            batch
                .iter()
                .map(|key| store.delete_kpi_facts(kpi_name, key)),
        )
        .await?;
        outcome.deleted += removed.into_iter().sum::<u64>();
    }

    for chunk in to_insert.chunks(config.insert_batch_size.max(1)) {
        outcome.inserted += store.insert_kpi_facts(chunk).await?;
    }

    tracing::info!(
        kpi_name = %kpi_name,
        inserted = outcome.inserted,
        deleted = outcome.deleted,
        "Persisted KPI"
    );
    Ok(outcome)
}
