use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    repository::{
        models::{
            AuditEntry, Building, EntitlementRuleRecord, Hierarchy, KpiFact, KpiFactFilter,
            KpiFactKey, KpiName, MappingProfile, OpexParameterRecord, Organization, Room,
            RoomCount, TransactionRecord, Unit,
        },
        table_service::{delete_rows, distinct_values, insert_rows, list_all_rows, list_rows},
        KpiStore,
    },
    services::opex::OpexParameters,
};

const KPI_TABLE: &str = "kpi_results";

/// Postgres-backed store. Rows are read through `row_to_json` and decoded leniently.
#[derive(Clone)]
pub struct PgKpiStore {
    pool: PgPool,
}

impl PgKpiStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KpiStore for PgKpiStore {
    async fn fetch_transactions(&self) -> AppResult<Vec<TransactionRecord>> {
        let rows = list_all_rows(&self.pool, "transactions", None, "id").await?;
        let total = rows.len();
        let transactions = rows
            .iter()
            .filter_map(transaction_from_row)
            .collect::<Vec<_>>();
        if transactions.len() < total {
            tracing::warn!(
                skipped = total - transactions.len(),
                "Skipping transactions without a usable id or period_month"
            );
        }
        Ok(transactions)
    }

    async fn fetch_transaction_months(&self) -> AppResult<Vec<NaiveDate>> {
        let values = distinct_values(&self.pool, "transactions", "period_month").await?;
        Ok(values
            .iter()
            .filter_map(|value| value.as_str().and_then(parse_date))
            .collect())
    }

    async fn fetch_hierarchy(&self) -> AppResult<Hierarchy> {
        let (organizations, buildings, units, rooms, room_counts) = tokio::try_join!(
            list_all_rows(&self.pool, "organizations", None, "id"),
            list_all_rows(&self.pool, "buildings", None, "id"),
            list_all_rows(&self.pool, "units", None, "id"),
            list_all_rows(&self.pool, "rooms", None, "id"),
            list_all_rows(&self.pool, "room_counts", None, "id"),
        )?;

        Ok(Hierarchy {
            organizations: organizations
                .iter()
                .filter_map(|row| {
                    Some(Organization {
                        id: uuid_field(row, "id")?,
                        name: value_str(row, "name"),
                    })
                })
                .collect(),
            buildings: buildings
                .iter()
                .filter_map(|row| {
                    Some(Building {
                        id: uuid_field(row, "id")?,
                        org_id: uuid_field(row, "org_id"),
                        name: value_str(row, "name"),
                    })
                })
                .collect(),
            units: units
                .iter()
                .filter_map(|row| {
                    Some(Unit {
                        id: uuid_field(row, "id")?,
                        org_id: uuid_field(row, "org_id"),
                        building_id: uuid_field(row, "building_id"),
                        name: value_str(row, "name"),
                        agreement_type: value_string(row.get("agreement_type")),
                    })
                })
                .collect(),
            rooms: rooms
                .iter()
                .filter_map(|row| {
                    Some(Room {
                        id: uuid_field(row, "id")?,
                        unit_id: uuid_field(row, "unit_id"),
                        name: value_string(row.get("name")),
                    })
                })
                .collect(),
            room_counts: room_counts
                .iter()
                .filter_map(|row| {
                    Some(RoomCount {
                        unit_id: uuid_field(row, "unit_id")?,
                        org_id: uuid_field(row, "org_id"),
                        building_id: uuid_field(row, "building_id"),
                        room_count: number_from_value(row.get("room_count")).round() as i64,
                    })
                })
                .collect(),
        })
    }

    async fn fetch_entitlement_rules(&self) -> AppResult<Vec<EntitlementRuleRecord>> {
        let rows = list_all_rows(&self.pool, "fee_entitlements", None, "id").await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(EntitlementRuleRecord {
                    id: uuid_field(row, "id")?,
                    revenue_class: value_str(row, "revenue_class"),
                    entitlement: value_str(row, "entitlement"),
                    org_id: uuid_field(row, "org_id"),
                    building_id: uuid_field(row, "building_id"),
                    unit_id: uuid_field(row, "unit_id"),
                    effective_start: date_field(row, "effective_start"),
                    effective_end: date_field(row, "effective_end"),
                    created_at: timestamp_field(row, "created_at"),
                })
            })
            .collect())
    }

    async fn fetch_opex_parameters(&self) -> AppResult<Vec<OpexParameterRecord>> {
        let rows = list_all_rows(&self.pool, "opex_parameters", None, "id").await?;
        Ok(rows.iter().filter_map(opex_parameters_from_row).collect())
    }

    async fn fetch_mapping_profile(&self, name: &str) -> AppResult<Option<MappingProfile>> {
        let mut filters = Map::new();
        filters.insert("name".to_string(), Value::String(name.to_string()));
        let rows = list_rows(&self.pool, "mapping_profiles", Some(&filters), 1, 0, "id").await?;
        Ok(rows.first().map(|row| mapping_profile_from_row(name, row)))
    }

    async fn fetch_kpi_facts(&self, filter: &KpiFactFilter) -> AppResult<Vec<KpiFact>> {
        let rows = list_all_rows(&self.pool, KPI_TABLE, Some(&fact_filters(filter)), "id").await?;
        Ok(rows.iter().filter_map(kpi_fact_from_row).collect())
    }

    async fn fetch_kpi_months(&self) -> AppResult<Vec<NaiveDate>> {
        let values = distinct_values(&self.pool, KPI_TABLE, "period_month").await?;
        Ok(values
            .iter()
            .filter_map(|value| value.as_str().and_then(parse_date))
            .collect())
    }

    async fn delete_kpi_facts(&self, kpi_name: KpiName, key: &KpiFactKey) -> AppResult<u64> {
        delete_rows(&self.pool, KPI_TABLE, &key_filters(kpi_name, key)).await
    }

    async fn insert_kpi_facts(&self, facts: &[KpiFact]) -> AppResult<u64> {
        let rows = facts
            .iter()
            .map(|fact| match serde_json::to_value(fact) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(AppError::Internal(format!(
                    "Could not serialize {} fact.",
                    fact.kpi_name
                ))),
            })
            .collect::<AppResult<Vec<_>>>()?;
        insert_rows(&self.pool, KPI_TABLE, &rows).await
    }

    async fn insert_audit_log(&self, entry: &AuditEntry) -> AppResult<()> {
        let mut row = Map::new();
        row.insert("action".to_string(), Value::String(entry.action.clone()));
        row.insert(
            "entity_type".to_string(),
            Value::String(entry.entity_type.clone()),
        );
        row.insert("details".to_string(), entry.details.clone());
        insert_rows(&self.pool, "audit_logs", &[row]).await?;
        Ok(())
    }
}

fn fact_filters(filter: &KpiFactFilter) -> Map<String, Value> {
    let mut filters = Map::new();
    if !filter.kpi_names.is_empty() {
        filters.insert(
            "kpi_name__in".to_string(),
            Value::Array(
                filter
                    .kpi_names
                    .iter()
                    .map(|name| Value::String(name.as_str().to_string()))
                    .collect(),
            ),
        );
    }
    if let Some(month) = filter.period_month {
        filters.insert("period_month".to_string(), Value::String(month.to_string()));
    }
    if let Some(org_id) = filter.org_id {
        filters.insert("org_id".to_string(), Value::String(org_id.to_string()));
    }
    if let Some(building_id) = filter.building_id {
        filters.insert(
            "building_id".to_string(),
            Value::String(building_id.to_string()),
        );
    }
    filters
}

fn key_filters(kpi_name: KpiName, key: &KpiFactKey) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert(
        "kpi_name".to_string(),
        Value::String(kpi_name.as_str().to_string()),
    );
    filters.insert(
        "period_month".to_string(),
        Value::String(key.period_month().to_string()),
    );
    let (column, id) = match key {
        KpiFactKey::Room { room_id, .. } => ("room_id", room_id),
        KpiFactKey::Unit { unit_id, .. } => ("unit_id", unit_id),
    };
    filters.insert(column.to_string(), Value::String(id.to_string()));
    filters
}

fn transaction_from_row(row: &Value) -> Option<TransactionRecord> {
    let id = uuid_field(row, "id")?;
    let Some(period_month) = date_field(row, "period_month") else {
        tracing::debug!(transaction_id = %id, "Transaction has no parseable period_month");
        return None;
    };
    Some(TransactionRecord {
        id,
        amount: number_from_value(row.get("amount")),
        account_name: value_string(row.get("account_name")),
        revenue_class: value_string(row.get("revenue_class")),
        period_month,
        org_id: uuid_field(row, "org_id"),
        building_id: uuid_field(row, "building_id"),
        unit_id: uuid_field(row, "unit_id"),
        room_id: uuid_field(row, "room_id"),
        source_room: value_string(
            row.get("extra_json")
                .and_then(|extra| extra.get("source_room")),
        ),
    })
}

fn opex_parameters_from_row(row: &Value) -> Option<OpexParameterRecord> {
    let defaults = OpexParameters::default();
    let number_or = |key: &str, fallback: f64| match row.get(key) {
        None | Some(Value::Null) => fallback,
        value => number_from_value(value),
    };
    Some(OpexParameterRecord {
        id: uuid_field(row, "id")?,
        org_id: uuid_field(row, "org_id"),
        building_id: uuid_field(row, "building_id"),
        unit_id: uuid_field(row, "unit_id"),
        effective_start: date_field(row, "effective_start"),
        effective_end: date_field(row, "effective_end"),
        is_active: row
            .get("is_active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        created_at: timestamp_field(row, "created_at"),
        cleaning_per_unit: number_or("cleaning_per_unit", defaults.cleaning_per_unit),
        cleaning_per_room: number_or("cleaning_per_room", defaults.cleaning_per_room),
        electricity_per_room: number_or("electricity_per_room", defaults.electricity_per_room),
        gas_per_room: number_or("gas_per_room", defaults.gas_per_room),
        smart_locks_per_unit: number_or("smart_locks_per_unit", defaults.smart_locks_per_unit),
    })
}

fn mapping_profile_from_row(name: &str, row: &Value) -> MappingProfile {
    let aliases = row
        .get("mapping_json")
        .and_then(Value::as_object)
        .map(|mapping| {
            mapping
                .iter()
                .filter_map(|(source, target)| {
                    let target = target.as_str()?.trim();
                    (!target.is_empty()).then(|| (source.clone(), target.to_string()))
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();
    MappingProfile {
        name: name.to_string(),
        aliases,
    }
}

fn kpi_fact_from_row(row: &Value) -> Option<KpiFact> {
    let kpi_name = KpiName::parse(&value_str(row, "kpi_name"))?;
    Some(KpiFact {
        kpi_name,
        value: number_from_value(row.get("value")),
        period_month: date_field(row, "period_month")?,
        org_id: uuid_field(row, "org_id"),
        building_id: uuid_field(row, "building_id"),
        unit_id: uuid_field(row, "unit_id"),
        room_id: uuid_field(row, "room_id"),
    })
}

fn value_str(row: &Value, key: &str) -> String {
    value_string(row.get(key)).unwrap_or_default()
}

fn value_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn number_from_value(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

fn uuid_field(row: &Value, key: &str) -> Option<Uuid> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|text| Uuid::parse_str(text.trim()).ok())
}

fn date_field(row: &Value, key: &str) -> Option<NaiveDate> {
    row.get(key).and_then(Value::as_str).and_then(parse_date)
}

/// Accepts `YYYY-MM-DD` with or without a trailing time component.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn timestamp_field(row: &Value, key: &str) -> Option<DateTime<Utc>> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    use super::{
        fact_filters, key_filters, kpi_fact_from_row, mapping_profile_from_row,
        opex_parameters_from_row, parse_date, transaction_from_row,
    };
    use crate::repository::models::{KpiFactFilter, KpiFactKey, KpiName};

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn decodes_transactions_leniently() {
        let row = json!({
            "id": ID,
            "amount": "not a number",
            "account_name": "  Rent Income ",
            "revenue_class": null,
            "period_month": "2025-03-01",
            "org_id": "garbage",
            "room_id": null,
            "extra_json": {"source_room": "100 Main St - 4B - Room A"},
        });
        let record = transaction_from_row(&row).expect("decodes");
        assert_eq!(record.amount, 0.0);
        assert_eq!(record.account_name.as_deref(), Some("Rent Income"));
        assert_eq!(record.org_id, None);
        assert_eq!(
            record.source_room.as_deref(),
            Some("100 Main St - 4B - Room A")
        );
        assert_eq!(
            record.period_month,
            NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date")
        );
    }

    #[test]
    fn transactions_without_period_are_skipped() {
        assert!(transaction_from_row(&json!({"id": ID, "amount": 5, "period_month": "March"})).is_none());
        assert!(transaction_from_row(&json!({"id": ID, "amount": 5})).is_none());
    }

    #[test]
    fn parses_dates_with_time_suffix() {
        assert_eq!(
            parse_date("2025-03-01T00:00:00+00:00"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(parse_date("03/01/2025"), None);
    }

    #[test]
    fn opex_rows_fall_back_to_defaults_per_column() {
        let record = opex_parameters_from_row(&json!({
            "id": ID,
            "unit_id": ID,
            "electricity_per_room": "120",
        }))
        .expect("decodes");
        assert!(record.is_active);
        assert_eq!(record.electricity_per_room, 120.0);
        assert_eq!(record.cleaning_per_unit, 75.0);
        assert_eq!(record.smart_locks_per_unit, 30.0);
    }

    #[test]
    fn mapping_profile_keeps_string_targets() {
        let profile = mapping_profile_from_row(
            "default",
            &json!({"mapping_json": {"Main 4B A": "100 Main St 4B Room A", "bad": 3, "empty": " "}}),
        );
        assert_eq!(profile.aliases.len(), 1);
        assert_eq!(
            profile.aliases.get("Main 4B A").map(String::as_str),
            Some("100 Main St 4B Room A")
        );
    }

    #[test]
    fn kpi_rows_with_unknown_names_are_ignored() {
        assert!(kpi_fact_from_row(&json!({"kpi_name": "legacy_metric", "value": 1, "period_month": "2025-03-01"})).is_none());
        let fact = kpi_fact_from_row(&json!({
            "kpi_name": "partner_noi",
            "value": 415,
            "period_month": "2025-03-01",
            "unit_id": ID,
        }))
        .expect("decodes");
        assert_eq!(fact.kpi_name, KpiName::PartnerNoi);
        assert_eq!(fact.value, 415.0);
    }

    #[test]
    fn key_filters_scope_deletes_to_one_identity() {
        let id = Uuid::parse_str(ID).expect("valid uuid");
        let month = NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date");
        let filters = key_filters(
            KpiName::InternalTakeRate,
            &KpiFactKey::Room {
                period_month: month,
                room_id: id,
            },
        );
        assert_eq!(
            serde_json::Value::Object(filters),
            json!({
                "kpi_name": "internal_take_rate_pct",
                "period_month": "2025-03-01",
                "room_id": ID,
            })
        );
    }

    #[test]
    fn fact_filters_skip_unset_fields() {
        let filters = fact_filters(&KpiFactFilter {
            kpi_names: vec![KpiName::PartnerNoi, KpiName::PartnerTotalRevenue],
            ..KpiFactFilter::default()
        });
        assert_eq!(
            serde_json::Value::Object(filters),
            json!({"kpi_name__in": ["partner_noi", "partner_total_revenue"]})
        );
    }
}
