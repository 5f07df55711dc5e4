use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "audit_logs",
    "buildings",
    "fee_entitlements",
    "kpi_results",
    "mapping_profiles",
    "opex_parameters",
    "organizations",
    "room_counts",
    "rooms",
    "transactions",
    "units",
];

const MAX_PAGE_SIZE: i64 = 1000;

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_select_query(table, filters, order_by)?;
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, MAX_PAGE_SIZE))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Reads a whole table page by page, ordered by `order_by` then `id`.
///
/// The `id` tiebreak keeps OFFSET pages disjoint when `order_by` is not unique.
pub async fn list_all_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
) -> Result<Vec<Value>, AppError> {
    let mut out = Vec::new();
    let mut offset = 0i64;
    loop {
        let page = list_rows(pool, table, filters, MAX_PAGE_SIZE, offset, order_by).await?;
        let fetched = page.len() as i64;
        out.extend(page);
        if fetched < MAX_PAGE_SIZE {
            break;
        }
        offset += fetched;
    }
    tracing::debug!(table, rows = out.len(), "Loaded table");
    Ok(out)
}

/// Distinct non-null values of one column, newest/largest first.
pub async fn distinct_values(
    pool: &sqlx::PgPool,
    table: &str,
    column: &str,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_distinct_query(table, column)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn delete_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: &Map<String, Value>,
) -> Result<u64, AppError> {
    let mut query = build_delete_query(table, filters)?;
    let result = query.build().execute(pool).await.map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn insert_rows(
    pool: &sqlx::PgPool,
    table: &str,
    rows: &[Map<String, Value>],
) -> Result<u64, AppError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut query = build_insert_query(table, rows)?;
    let result = query.build().execute(pool).await.map_err(map_db_error)?;
    Ok(result.rows_affected())
}

fn build_select_query(
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "id"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }
    query.push(" ORDER BY t.").push(order_name).push(" ASC");
    if order_name != "id" {
        query.push(", t.id ASC");
    }
    Ok(query)
}

fn build_distinct_query(
    table: &str,
    column: &str,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let column_name = validate_identifier(column)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT to_json(t.");
    query
        .push(column_name)
        .push(") AS row FROM (SELECT DISTINCT ")
        .push(column_name)
        .push(" FROM ")
        .push(table_name)
        .push(" WHERE ")
        .push(column_name)
        .push(" IS NOT NULL) t ORDER BY t.")
        .push(column_name)
        .push(" DESC");
    Ok(query)
}

/// Refuses to build an unfiltered delete.
fn build_delete_query(
    table: &str,
    filters: &Map<String, Value>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if filters.values().all(Value::is_null) {
        return Err(AppError::BadRequest(format!(
            "Refusing to delete from {table_name} without a filter."
        )));
    }

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    for (key, value) in filters {
        push_filter_clause(&mut query, key, value)?;
    }
    Ok(query)
}

/// Batch insert through `jsonb_populate_recordset` so PostgreSQL resolves column
/// types (uuid, date, numeric) from the table definition.
fn build_insert_query(
    table: &str,
    rows: &[Map<String, Value>],
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let mut columns = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<Vec<_>>();
    columns.sort_unstable();
    columns.dedup();
    if columns.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} records."
        )));
    }
    let columns = columns
        .iter()
        .map(|column| validate_identifier(column).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(column.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push("r.");
            separated.push_unseparated(column.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_recordset(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Array(
        rows.iter().cloned().map(Value::Object).collect(),
    ));
    query.push(") r");
    Ok(query)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&'static str, AppError> {
    let normalized = validate_identifier(table)?;
    ALLOWED_TABLES
        .iter()
        .copied()
        .find(|allowed| *allowed == normalized)
        .ok_or_else(|| AppError::Forbidden(format!("Table '{normalized}' is not allowed.")))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let well_formed = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) && !trimmed.starts_with(|first: char| first.is_ascii_digit());
    if !well_formed {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
}

impl FilterOperator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
            Self::IsNull => " IS NULL",
        }
    }
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let Some((column, suffix)) = filter_key.rsplit_once("__") else {
        return Ok((validate_identifier(filter_key)?, FilterOperator::Eq));
    };
    let operator = match suffix {
        "gt" => FilterOperator::Gt,
        "gte" => FilterOperator::Gte,
        "lt" => FilterOperator::Lt,
        "lte" => FilterOperator::Lte,
        "is_null" => FilterOperator::IsNull,
        "in" => FilterOperator::Eq,
        _ => return Ok((validate_identifier(filter_key)?, FilterOperator::Eq)),
    };
    Ok((validate_identifier(column)?, operator))
}

fn push_filter_clause(
    query: &mut QueryBuilder<'static, Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if operator == FilterOperator::IsNull {
        query.push(" AND t.").push(column);
        if value.as_bool().unwrap_or(true) {
            query.push(" IS NULL");
        } else {
            query.push(" IS NOT NULL");
        }
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if operator != FilterOperator::Eq {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            push_any_filter(query, column, items);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar_filter(query, column, operator, infer_scalar_filter(column, value));
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    operator: FilterOperator,
    value: ScalarFilter,
) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text").push(operator.sql()).push_bind(text);
        }
        ScalarFilter::Uuid(id) => {
            query.push(operator.sql()).push_bind(id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(operator.sql()).push_bind(flag);
        }
        ScalarFilter::I64(number) => {
            query.push(operator.sql()).push_bind(number);
        }
        ScalarFilter::F64(number) => {
            query.push(operator.sql()).push_bind(number);
        }
        ScalarFilter::Date(date) => {
            query.push(operator.sql()).push_bind(date);
        }
        ScalarFilter::Timestamp(timestamp) => {
            query.push(operator.sql()).push_bind(timestamp);
        }
    }
}

/// `column = ANY(...)`; uuid-typed when every value parses, text otherwise.
fn push_any_filter(query: &mut QueryBuilder<'static, Postgres>, column: &str, items: &[Value]) {
    if items.is_empty() {
        return;
    }
    query.push(" AND t.").push(column);
    let as_uuids = is_uuid_identifier(column)
        .then(|| {
            items
                .iter()
                .map(|item| item.as_str().and_then(|text| uuid::Uuid::parse_str(text.trim()).ok()))
                .collect::<Option<Vec<_>>>()
        })
        .flatten();
    match as_uuids {
        Some(ids) => {
            query.push(" = ANY(").push_bind(ids).push(")");
        }
        None => {
            let texts = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>();
            query.push("::text = ANY(").push_bind(texts).push(")");
        }
    }
}

fn infer_scalar_filter(column: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(ScalarFilter::I64)
            .or_else(|| number.as_f64().map(ScalarFilter::F64))
            .unwrap_or_else(|| ScalarFilter::Text(number.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_timestamp_identifier(column) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        other => ScalarFilter::Text(other.to_string()),
    }
}

fn is_uuid_identifier(identifier: &str) -> bool {
    identifier == "id" || identifier.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    identifier.ends_with("_date")
        || identifier.ends_with("_month")
        || matches!(identifier, "effective_start" | "effective_end")
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency(format!("Database operation failed: {message}"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};

    use super::{
        build_delete_query, build_distinct_query, build_insert_query, build_select_query,
        infer_scalar_filter, parse_filter_key, validate_table, FilterOperator, ScalarFilter,
    };
    use crate::error::AppError;

    fn filters(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn rejects_tables_outside_the_allow_list() {
        assert!(validate_table("kpi_results").is_ok());
        assert!(matches!(
            validate_table("app_users"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            validate_table("kpi_results; drop table units"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn infers_filter_types_from_column_names() {
        assert_eq!(
            infer_scalar_filter("period_month", &json!("2025-03-01")),
            ScalarFilter::Date(NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"))
        );
        assert!(matches!(
            infer_scalar_filter("room_id", &json!("550e8400-e29b-41d4-a716-446655440000")),
            ScalarFilter::Uuid(_)
        ));
        assert_eq!(
            infer_scalar_filter("room_id", &json!("not-a-uuid")),
            ScalarFilter::Text("not-a-uuid".to_string())
        );
        assert_eq!(
            parse_filter_key("period_month__gte").expect("valid key"),
            ("period_month", FilterOperator::Gte)
        );
    }

    #[test]
    fn select_sql_pages_in_stable_order() {
        let query = build_select_query(
            "transactions",
            Some(&filters(json!({"org_id": "550e8400-e29b-41d4-a716-446655440000"}))),
            "",
        )
        .expect("query builds");
        let sql = query.sql();
        assert!(
            sql.starts_with("SELECT row_to_json(t) AS row FROM transactions t WHERE 1=1"),
            "unexpected SQL: {sql}"
        );
        assert!(sql.contains("AND t.org_id = $1"), "unexpected SQL: {sql}");
        assert!(sql.ends_with("ORDER BY t.id ASC"), "unexpected SQL: {sql}");
    }

    #[test]
    fn select_sql_breaks_order_ties_by_id() {
        let query = build_select_query("room_counts", None, "unit_id").expect("query builds");
        assert!(
            query.sql().ends_with("ORDER BY t.unit_id ASC, t.id ASC"),
            "unexpected SQL: {}",
            query.sql()
        );
    }

    #[test]
    fn distinct_sql_orders_newest_first() {
        let query = build_distinct_query("transactions", "period_month").expect("query builds");
        assert_eq!(
            query.sql(),
            "SELECT to_json(t.period_month) AS row FROM (SELECT DISTINCT period_month FROM transactions WHERE period_month IS NOT NULL) t ORDER BY t.period_month DESC"
        );
    }

    #[test]
    fn delete_sql_is_scoped_by_every_filter() {
        let query = build_delete_query(
            "kpi_results",
            &filters(json!({
                "kpi_name": "partner_noi",
                "period_month": "2025-03-01",
                "unit_id": "550e8400-e29b-41d4-a716-446655440000",
            })),
        )
        .expect("query builds");
        let sql = query.sql();
        assert!(sql.starts_with("DELETE FROM kpi_results t WHERE 1=1"), "unexpected SQL: {sql}");
        assert!(sql.contains("t.kpi_name::text = $1"), "unexpected SQL: {sql}");
        assert!(sql.contains("t.period_month = $2"), "unexpected SQL: {sql}");
        assert!(sql.contains("t.unit_id = $3"), "unexpected SQL: {sql}");
    }

    #[test]
    fn delete_without_filter_is_refused() {
        assert!(matches!(
            build_delete_query("kpi_results", &Map::new()),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            build_delete_query("kpi_results", &filters(json!({"room_id": null}))),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_recordset() {
        let rows = vec![
            filters(json!({"kpi_name": "partner_noi", "value": 415.0, "unit_id": null})),
            filters(json!({"kpi_name": "partner_noi", "value": 10.0, "room_id": null})),
        ];
        let query = build_insert_query("kpi_results", &rows).expect("query builds");
        let sql = query.sql();
        assert!(
            sql.starts_with("INSERT INTO kpi_results (kpi_name, room_id, unit_id, value) SELECT r.kpi_name, r.room_id, r.unit_id, r.value"),
            "unexpected SQL: {sql}"
        );
        assert!(
            sql.contains("FROM jsonb_populate_recordset(NULL::kpi_results, $1) r"),
            "unexpected SQL: {sql}"
        );
    }
}
