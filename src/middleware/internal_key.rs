use axum::http::HeaderMap;

use crate::{config::AppConfig, error::AppError};

pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// No-op when `INTERNAL_API_KEY` is unset.
pub fn require_internal_key(config: &AppConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = config.internal_api_key.as_deref().unwrap_or_default();
    if expected.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if provided != expected {
        return Err(AppError::Forbidden(
            "Invalid or missing internal API key.".to_string(),
        ));
    }
    Ok(())
}
