use std::env;

use crate::services::opex::OpexParameters;

pub const DEFAULT_MANAGEMENT_FEE_RATE: f64 = 0.10;
pub const DEFAULT_IN_SCOPE_AGREEMENT_TYPE: &str = "management";
pub const DEFAULT_MAPPING_PROFILE_NAME: &str = "default";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub internal_api_key: Option<String>,
    pub kpi_summary_cache_ttl_seconds: u64,
    pub kpi_summary_cache_max_entries: u64,
    pub management_fee_rate: f64,
    pub in_scope_agreement_type: String,
    pub opex_cleaning_per_unit: f64,
    pub opex_cleaning_per_room: f64,
    pub opex_electricity_per_room: f64,
    pub opex_gas_per_room: f64,
    pub opex_smart_locks_per_unit: f64,
    pub kpi_delete_batch_size: usize,
    pub kpi_insert_batch_size: usize,
    pub mapping_profile_name: String,
}

/// Policy knobs for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub management_fee_rate: f64,
    pub in_scope_agreement_type: String,
    pub opex: OpexParameters,
    pub delete_batch_size: usize,
    pub insert_batch_size: usize,
    pub mapping_profile_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            management_fee_rate: DEFAULT_MANAGEMENT_FEE_RATE,
            in_scope_agreement_type: DEFAULT_IN_SCOPE_AGREEMENT_TYPE.to_string(),
            opex: OpexParameters::default(),
            delete_batch_size: 50,
            insert_batch_size: 500,
            mapping_profile_name: DEFAULT_MAPPING_PROFILE_NAME.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let opex = OpexParameters::default();
        Self {
            app_name: env_or("APP_NAME", "Portfolio KPI API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL").or_else(|| env_opt("SUPABASE_DB_URL")),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            kpi_summary_cache_ttl_seconds: env_parse_or("KPI_SUMMARY_CACHE_TTL_SECONDS", 60),
            kpi_summary_cache_max_entries: env_parse_or("KPI_SUMMARY_CACHE_MAX_ENTRIES", 500),
            management_fee_rate: env_parse_or("MANAGEMENT_FEE_RATE", DEFAULT_MANAGEMENT_FEE_RATE),
            in_scope_agreement_type: env_or(
                "IN_SCOPE_AGREEMENT_TYPE",
                DEFAULT_IN_SCOPE_AGREEMENT_TYPE,
            ),
            opex_cleaning_per_unit: env_parse_or("OPEX_CLEANING_PER_UNIT", opex.cleaning_per_unit),
            opex_cleaning_per_room: env_parse_or("OPEX_CLEANING_PER_ROOM", opex.cleaning_per_room),
            opex_electricity_per_room: env_parse_or(
                "OPEX_ELECTRICITY_PER_ROOM",
                opex.electricity_per_room,
            ),
            opex_gas_per_room: env_parse_or("OPEX_GAS_PER_ROOM", opex.gas_per_room),
            opex_smart_locks_per_unit: env_parse_or(
                "OPEX_SMART_LOCKS_PER_UNIT",
                opex.smart_locks_per_unit,
            ),
            kpi_delete_batch_size: env_parse_or("KPI_DELETE_BATCH_SIZE", 50),
            kpi_insert_batch_size: env_parse_or("KPI_INSERT_BATCH_SIZE", 500),
            mapping_profile_name: env_or("MAPPING_PROFILE_NAME", DEFAULT_MAPPING_PROFILE_NAME),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let management_fee_rate =
            if self.management_fee_rate.is_finite() && self.management_fee_rate >= 0.0 {
                self.management_fee_rate
            } else {
                tracing::warn!(
                    configured = self.management_fee_rate,
                    fallback = DEFAULT_MANAGEMENT_FEE_RATE,
                    "Ignoring invalid MANAGEMENT_FEE_RATE"
                );
                DEFAULT_MANAGEMENT_FEE_RATE
            };

        let agreement = self.in_scope_agreement_type.trim();
        PipelineConfig {
            management_fee_rate,
            in_scope_agreement_type: if agreement.is_empty() {
                DEFAULT_IN_SCOPE_AGREEMENT_TYPE.to_string()
            } else {
                agreement.to_ascii_lowercase()
            },
            opex: OpexParameters {
                cleaning_per_unit: self.opex_cleaning_per_unit,
                cleaning_per_room: self.opex_cleaning_per_room,
                electricity_per_room: self.opex_electricity_per_room,
                gas_per_room: self.opex_gas_per_room,
                smart_locks_per_unit: self.opex_smart_locks_per_unit,
            },
            delete_batch_size: self.kpi_delete_batch_size.max(1),
            insert_batch_size: self.kpi_insert_batch_size.max(1),
            mapping_profile_name: self.mapping_profile_name.clone(),
        }
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            app_name: "test".to_string(),
            environment: "test".to_string(),
            api_prefix: "/v1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: Vec::new(),
            rate_limit_enabled: false,
            rate_limit_per_second: 10,
            rate_limit_burst_size: 100,
            database_url: None,
            db_pool_max_connections: 1,
            db_pool_min_connections: 1,
            db_pool_acquire_timeout_seconds: 1,
            db_pool_idle_timeout_seconds: 1,
            internal_api_key: None,
            kpi_summary_cache_ttl_seconds: 60,
            kpi_summary_cache_max_entries: 100,
            management_fee_rate: 0.10,
            in_scope_agreement_type: "management".to_string(),
            opex_cleaning_per_unit: 75.0,
            opex_cleaning_per_room: 15.0,
            opex_electricity_per_room: 150.0,
            opex_gas_per_room: 25.0,
            opex_smart_locks_per_unit: 30.0,
            kpi_delete_batch_size: 50,
            kpi_insert_batch_size: 500,
            mapping_profile_name: "default".to_string(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}
