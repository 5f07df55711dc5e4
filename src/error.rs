use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::pipelines::PipelineStage;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failure of a full pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline stage '{stage}' failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: AppError,
    },
    #[error("a pipeline run is already in progress")]
    AlreadyRunning,
}

impl PipelineError {
    pub fn at(stage: PipelineStage) -> impl FnOnce(AppError) -> Self {
        move |source| Self::Stage { stage, source }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::AlreadyRunning => None,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::AlreadyRunning => AppError::Conflict(error.to_string()),
            PipelineError::Stage { .. } => AppError::Dependency(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::{AppError, PipelineError};
    use crate::services::pipelines::PipelineStage;

    #[test]
    fn stage_failures_name_the_stage_and_cause() {
        let error = PipelineError::at(PipelineStage::PersistPartnerKpis)(AppError::Dependency(
            "Database operation failed: connection reset".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "pipeline stage 'persist_partner_kpis' failed: Database operation failed: connection reset"
        );
        assert_eq!(error.stage(), Some(PipelineStage::PersistPartnerKpis));

        let app_error = AppError::from(error);
        assert_eq!(app_error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn concurrent_run_maps_to_conflict() {
        let app_error = AppError::from(PipelineError::AlreadyRunning);
        assert_eq!(app_error.status_code(), StatusCode::CONFLICT);
    }
}
