use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, AppResult},
    repository::{
        models::{
            AuditEntry, EntitlementRuleRecord, Hierarchy, KpiFact, KpiFactFilter, KpiFactKey,
            KpiName, MappingProfile, OpexParameterRecord, TransactionRecord,
        },
        KpiStore,
    },
};

/// Operations a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FetchTransactions,
    FetchHierarchy,
    FetchEntitlementRules,
    DeleteKpiFacts(KpiName),
    InsertKpiFacts(KpiName),
    InsertAuditLog,
}

/// In-memory store for pipeline tests.
#[derive(Default)]
pub struct InMemoryKpiStore {
    transactions: RwLock<Vec<TransactionRecord>>,
    hierarchy: RwLock<Hierarchy>,
    entitlement_rules: RwLock<Vec<EntitlementRuleRecord>>,
    opex_parameters: RwLock<Vec<OpexParameterRecord>>,
    mapping_profiles: RwLock<Vec<MappingProfile>>,
    kpi_facts: RwLock<Vec<KpiFact>>,
    audit_log: RwLock<Vec<AuditEntry>>,
    failing: RwLock<Vec<StoreOperation>>,
}

impl InMemoryKpiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_transactions(&self, transactions: Vec<TransactionRecord>) {
        *self.transactions.write().await = transactions;
    }

    pub async fn set_hierarchy(&self, hierarchy: Hierarchy) {
        *self.hierarchy.write().await = hierarchy;
    }

    pub async fn set_entitlement_rules(&self, rules: Vec<EntitlementRuleRecord>) {
        *self.entitlement_rules.write().await = rules;
    }

    pub async fn set_opex_parameters(&self, parameters: Vec<OpexParameterRecord>) {
        *self.opex_parameters.write().await = parameters;
    }

    pub async fn add_mapping_profile(&self, profile: MappingProfile) {
        self.mapping_profiles.write().await.push(profile);
    }

    pub async fn seed_kpi_facts(&self, facts: Vec<KpiFact>) {
        self.kpi_facts.write().await.extend(facts);
    }

    pub async fn fail_on(&self, operation: StoreOperation) {
        self.failing.write().await.push(operation);
    }

    pub async fn kpi_facts(&self) -> Vec<KpiFact> {
        self.kpi_facts.read().await.clone()
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.read().await.clone()
    }

    async fn check(&self, operation: StoreOperation) -> AppResult<()> {
        if self.failing.read().await.contains(&operation) {
            return Err(AppError::Dependency(format!(
                "Mock failure on {operation:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KpiStore for InMemoryKpiStore {
    async fn fetch_transactions(&self) -> AppResult<Vec<TransactionRecord>> {
        self.check(StoreOperation::FetchTransactions).await?;
        Ok(self.transactions.read().await.clone())
    }

    async fn fetch_transaction_months(&self) -> AppResult<Vec<NaiveDate>> {
        self.check(StoreOperation::FetchTransactions).await?;
        let months = self
            .transactions
            .read()
            .await
            .iter()
            .map(|transaction| transaction.period_month)
            .collect::<BTreeSet<_>>();
        Ok(months.into_iter().rev().collect())
    }

    async fn fetch_hierarchy(&self) -> AppResult<Hierarchy> {
        self.check(StoreOperation::FetchHierarchy).await?;
        Ok(self.hierarchy.read().await.clone())
    }

    async fn fetch_entitlement_rules(&self) -> AppResult<Vec<EntitlementRuleRecord>> {
        self.check(StoreOperation::FetchEntitlementRules).await?;
        Ok(self.entitlement_rules.read().await.clone())
    }

    async fn fetch_opex_parameters(&self) -> AppResult<Vec<OpexParameterRecord>> {
        Ok(self.opex_parameters.read().await.clone())
    }

    async fn fetch_mapping_profile(&self, name: &str) -> AppResult<Option<MappingProfile>> {
        Ok(self
            .mapping_profiles
            .read()
            .await
            .iter()
            .find(|profile| profile.name == name)
            .cloned())
    }

    async fn fetch_kpi_facts(&self, filter: &KpiFactFilter) -> AppResult<Vec<KpiFact>> {
        Ok(self
            .kpi_facts
            .read()
            .await
            .iter()
            .filter(|fact| filter.matches(fact))
            .cloned()
            .collect())
    }

    async fn fetch_kpi_months(&self) -> AppResult<Vec<NaiveDate>> {
        let months = self
            .kpi_facts
            .read()
            .await
            .iter()
            .map(|fact| fact.period_month)
            .collect::<BTreeSet<_>>();
        Ok(months.into_iter().rev().collect())
    }

    async fn delete_kpi_facts(&self, kpi_name: KpiName, key: &KpiFactKey) -> AppResult<u64> {
        self.check(StoreOperation::DeleteKpiFacts(kpi_name)).await?;
        let mut facts = self.kpi_facts.write().await;
        let before = facts.len();
        facts.retain(|fact| !(fact.kpi_name == kpi_name && key.covers(fact)));
        Ok((before - facts.len()) as u64)
    }

    async fn insert_kpi_facts(&self, facts: &[KpiFact]) -> AppResult<u64> {
        if let Some(first) = facts.first() {
            self.check(StoreOperation::InsertKpiFacts(first.kpi_name))
                .await?;
        }
        self.kpi_facts.write().await.extend_from_slice(facts);
        Ok(facts.len() as u64)
    }

    async fn insert_audit_log(&self, entry: &AuditEntry) -> AppResult<()> {
        self.check(StoreOperation::InsertAuditLog).await?;
        self.audit_log.write().await.push(entry.clone());
        Ok(())
    }
}
