use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{error::AppError, services::staging::month_start};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct InternalSummaryQuery {
    #[validate(length(min = 7, max = 10))]
    pub period_month: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct PartnerSummaryQuery {
    #[validate(length(min = 7, max = 10))]
    pub period_month: String,
    pub org_id: Option<String>,
    pub building_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct RunPipelinesQuery {
    /// Date the opex overrides are evaluated at; today when absent.
    pub as_of: Option<String>,
}

/// Accepts `YYYY-MM` or any `YYYY-MM-DD` and returns the first of that month.
pub fn parse_period_month(raw: &str) -> Result<NaiveDate, AppError> {
    let trimmed = raw.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d"))
        .map_err(|_| {
            AppError::BadRequest(format!(
                "Invalid period_month '{trimmed}'. Expected YYYY-MM or YYYY-MM-DD."
            ))
        })?;
    Ok(month_start(parsed))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date '{}'.", raw.trim())))
}

pub fn parse_optional_uuid(field: &str, raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => Uuid::parse_str(value)
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("Invalid {field} '{value}'."))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        parse_optional_uuid, parse_period_month, validate_input, InternalSummaryQuery,
    };
    use crate::error::AppError;

    #[test]
    fn period_month_normalizes_to_month_start() {
        let march = NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date");
        assert_eq!(parse_period_month("2025-03").expect("parses"), march);
        assert_eq!(parse_period_month(" 2025-03-17 ").expect("parses"), march);
        assert!(matches!(
            parse_period_month("March 2025"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn optional_ids_must_be_uuids() {
        assert_eq!(parse_optional_uuid("org_id", None).expect("empty ok"), None);
        assert_eq!(parse_optional_uuid("org_id", Some("  ")).expect("blank ok"), None);
        assert!(parse_optional_uuid("org_id", Some("abc")).is_err());
    }

    #[test]
    fn short_period_fails_validation() {
        let query = InternalSummaryQuery {
            period_month: "2025".to_string(),
        };
        assert!(matches!(
            validate_input(&query),
            Err(AppError::UnprocessableEntity(_))
        ));
    }
}
