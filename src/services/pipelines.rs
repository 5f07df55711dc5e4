use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::{
    config::PipelineConfig,
    error::PipelineError,
    repository::{models::AuditEntry, KpiStore},
    services::{
        entitlements::EntitlementResolver,
        internal_metrics::build_internal_metrics,
        kpi_persistence::{persist_internal_kpis, persist_partner_kpis},
        opex::{estimate_unit_opex, OpexOverride},
        partner_revenue::build_partner_revenue,
        staging::stage_transactions,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    FetchInputs,
    PersistPartnerKpis,
    PersistInternalKpis,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchInputs => "fetch_inputs",
            Self::PersistPartnerKpis => "persist_partner_kpis",
            Self::PersistInternalKpis => "persist_internal_kpis",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts per stage of one completed run, plus what persistence did with them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub staged: usize,
    pub unit_opex: usize,
    pub partner: usize,
    pub internal: usize,
    pub facts_inserted: u64,
    pub facts_deleted: u64,
    pub dropped_non_finite: usize,
    pub dropped_unkeyed: usize,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "staged={} unit_opex={} partner={} internal={} inserted={} deleted={} dropped_non_finite={} dropped_unkeyed={}",
            self.staged,
            self.unit_opex,
            self.partner,
            self.internal,
            self.facts_inserted,
            self.facts_deleted,
            self.dropped_non_finite,
            self.dropped_unkeyed
        )
    }
}

/// Recomputes every KPI from the full transaction set.
///
/// Inputs are fetched concurrently; staging, estimation and aggregation are pure;
/// partner KPIs are persisted before internal ones. `as_of` selects the opex
/// overrides in effect.
pub async fn run_all_pipelines<S: KpiStore + ?Sized>(
    store: &S,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Result<PipelineSummary, PipelineError> {
    let (transactions, hierarchy, rule_records, opex_records, mapping_profile) = tokio::try_join!(
        store.fetch_transactions(),
        store.fetch_hierarchy(),
        store.fetch_entitlement_rules(),
        store.fetch_opex_parameters(),
        store.fetch_mapping_profile(&config.mapping_profile_name),
    )
    .map_err(PipelineError::at(PipelineStage::FetchInputs))?;
    tracing::info!(
        transactions = transactions.len(),
        units = hierarchy.units.len(),
        rules = rule_records.len(),
        "Fetched pipeline inputs"
    );

    let resolver = EntitlementResolver::from_records(&rule_records);
    tracing::debug!(usable_rules = resolver.rule_count(), "Built entitlement resolver");
    let staged = stage_transactions(
        &transactions,
        &hierarchy,
        &resolver,
        mapping_profile.as_ref(),
        &config.in_scope_agreement_type,
    );
    tracing::info!(staged = staged.len(), "Staged transactions");

    let in_scope_units = hierarchy
        .units
        .iter()
        .filter(|unit| {
            unit.agreement_type
                .as_deref()
                .is_some_and(|agreement| {
                    agreement
                        .trim()
                        .eq_ignore_ascii_case(&config.in_scope_agreement_type)
                })
        })
        .map(|unit| unit.id)
        .collect::<HashSet<_>>();
    let unit_opex = estimate_unit_opex(
        &hierarchy.room_counts,
        &in_scope_units,
        &config.opex,
        &OpexOverride::from_records(&opex_records),
        as_of,
    );
    tracing::info!(unit_opex = unit_opex.len(), "Estimated unit opex");

    let partner = build_partner_revenue(&staged, &unit_opex, config.management_fee_rate);
    let internal = build_internal_metrics(&staged, config.management_fee_rate);
    tracing::info!(
        partner = partner.len(),
        internal = internal.len(),
        "Aggregated KPI rows"
    );

    let mut persisted = persist_partner_kpis(store, &partner, config)
        .await
        .map_err(PipelineError::at(PipelineStage::PersistPartnerKpis))?;
    persisted.absorb(
        persist_internal_kpis(store, &internal, config)
            .await
            .map_err(PipelineError::at(PipelineStage::PersistInternalKpis))?,
    );

    let summary = PipelineSummary {
        staged: staged.len(),
        unit_opex: unit_opex.len(),
        partner: partner.len(),
        internal: internal.len(),
        facts_inserted: persisted.inserted,
        facts_deleted: persisted.deleted,
        dropped_non_finite: persisted.dropped_non_finite,
        dropped_unkeyed: persisted.dropped_unkeyed,
    };

    let entry = AuditEntry {
        action: "run_pipelines".to_string(),
        entity_type: "kpi_results".to_string(),
        details: json!(summary),
    };
    if let Err(error) = store.insert_audit_log(&entry).await {
        tracing::warn!(error = %error, "Could not record pipeline run in audit log");
    }

    tracing::info!(%summary, "Pipeline run complete");
    Ok(summary)
}

/// Runs the pipelines unless another run holds `guard`.
pub async fn run_exclusive<S: KpiStore + ?Sized>(
    guard: &Mutex<()>,
    store: &S,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Result<PipelineSummary, PipelineError> {
    let Ok(_running) = guard.try_lock() else {
        tracing::warn!("Rejecting pipeline run while another is in progress");
        return Err(PipelineError::AlreadyRunning);
    };
    run_all_pipelines(store, config, as_of).await
}
