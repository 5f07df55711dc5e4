pub mod models;
pub mod pg_store;
pub mod table_service;

#[cfg(test)]
pub mod memory_store;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::AppResult;
use models::{
    AuditEntry, EntitlementRuleRecord, Hierarchy, KpiFact, KpiFactFilter, KpiFactKey, KpiName,
    MappingProfile, OpexParameterRecord, TransactionRecord,
};

/// Everything the pipelines read from and write to.
#[async_trait]
pub trait KpiStore: Send + Sync {
    async fn fetch_transactions(&self) -> AppResult<Vec<TransactionRecord>>;

    /// Distinct transaction months, newest first.
    async fn fetch_transaction_months(&self) -> AppResult<Vec<NaiveDate>>;

    async fn fetch_hierarchy(&self) -> AppResult<Hierarchy>;

    async fn fetch_entitlement_rules(&self) -> AppResult<Vec<EntitlementRuleRecord>>;

    async fn fetch_opex_parameters(&self) -> AppResult<Vec<OpexParameterRecord>>;

    async fn fetch_mapping_profile(&self, name: &str) -> AppResult<Option<MappingProfile>>;

    async fn fetch_kpi_facts(&self, filter: &KpiFactFilter) -> AppResult<Vec<KpiFact>>;

    /// Distinct months with stored KPI facts, newest first.
    async fn fetch_kpi_months(&self) -> AppResult<Vec<NaiveDate>>;

    /// Removes every stored fact of `kpi_name` that `key` covers. Returns the count removed.
    async fn delete_kpi_facts(&self, kpi_name: KpiName, key: &KpiFactKey) -> AppResult<u64>;

    async fn insert_kpi_facts(&self, facts: &[KpiFact]) -> AppResult<u64>;

    async fn insert_audit_log(&self, entry: &AuditEntry) -> AppResult<()>;
}
