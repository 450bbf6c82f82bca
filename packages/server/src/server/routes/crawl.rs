//! Crawl control endpoints under `/api/crawl`.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use telegram::models::ConnectionTest;
use telegram::{TelegramOptions, TelegramService};

use crate::domains::crawl_jobs::actions::{self, GapReport, InitJobRequest, JobStatusView};
use crate::domains::crawl_jobs::error::ControlError;
use crate::domains::crawl_jobs::models::{Job, JobId, WorkId};
use crate::kernel::key_pool::KeySnapshot;
use crate::server::app::AxumAppState;

/// Control errors as JSON responses.
pub struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(error: ControlError) -> Self {
        Self(error)
    }
}

pub fn status_for(error: &ControlError) -> StatusCode {
    match error {
        ControlError::JobNotFound(_)
        | ControlError::WorkNotFound(_)
        | ControlError::UnitNotFound { .. } => StatusCode::NOT_FOUND,
        ControlError::AlreadyCompleted(_)
        | ControlError::AlreadyProcessing(_)
        | ControlError::AlreadyActive { .. }
        | ControlError::InvalidState { .. } => StatusCode::CONFLICT,
        ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ControlError::NoKeysConfigured | ControlError::QueueClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Control request failed");
        }
        let mut body = json!({ "error": self.0.to_string() });
        if let ControlError::AlreadyActive { job_id, .. } = &self.0 {
            body["job_id"] = json!(job_id);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn init_handler(
    Extension(state): Extension<AxumAppState>,
    Json(request): Json<InitJobRequest>,
) -> ApiResult<Job> {
    Ok(Json(actions::init_job(request, &state.deps).await?))
}

#[derive(Debug, Deserialize)]
pub struct ProcessBatchBody {
    /// Number of chunks to run.
    #[serde(default = "default_count")]
    pub count: i32,
    pub merge_size: Option<i32>,
}

fn default_count() -> i32 {
    1
}

pub async fn process_batch_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<ProcessBatchBody>,
) -> ApiResult<Job> {
    Ok(Json(
        actions::process_batch(job_id, body.count, body.merge_size, &state.deps).await?,
    ))
}

pub async fn pause_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Job> {
    Ok(Json(actions::pause_job(job_id, &state.deps).await?))
}

pub async fn resume_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Job> {
    let job = actions::resume_job(job_id, &state.deps).await?;
    if job.auto_mode {
        state.scheduler.wake();
    }
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct AutoModeBody {
    pub enabled: bool,
}

pub async fn toggle_auto_mode_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<AutoModeBody>,
) -> ApiResult<Job> {
    let job = actions::toggle_auto_mode(job_id, body.enabled, &state.deps).await?;
    if body.enabled {
        state.scheduler.wake();
    }
    Ok(Json(job))
}

pub async fn job_status_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<JobStatusView> {
    Ok(Json(actions::job_status(job_id, &state.deps).await?))
}

pub async fn list_active_jobs_handler(
    Extension(state): Extension<AxumAppState>,
) -> ApiResult<Vec<Job>> {
    Ok(Json(actions::list_active_jobs(&state.deps).await?))
}

pub async fn scan_gaps_handler(
    Extension(state): Extension<AxumAppState>,
    Path(work_id): Path<WorkId>,
) -> ApiResult<GapReport> {
    Ok(Json(actions::scan_gaps(work_id, &state.deps).await?))
}

#[derive(Debug, Deserialize)]
pub struct FixRangeBody {
    pub start: i32,
    pub end: i32,
}

pub async fn fix_range_handler(
    Extension(state): Extension<AxumAppState>,
    Path(work_id): Path<WorkId>,
    Json(body): Json<FixRangeBody>,
) -> ApiResult<GapReport> {
    Ok(Json(
        actions::fix_range(work_id, body.start, body.end, &state.deps).await?,
    ))
}

pub async fn retry_unit_handler(
    Extension(state): Extension<AxumAppState>,
    Path((work_id, ordinal)): Path<(WorkId, i32)>,
) -> ApiResult<GapReport> {
    Ok(Json(actions::retry_unit(work_id, ordinal, &state.deps).await?))
}

pub async fn key_status_handler(
    Extension(state): Extension<AxumAppState>,
) -> Json<Vec<KeySnapshot>> {
    Json(actions::key_status(&state.deps))
}

#[derive(Debug, Serialize)]
pub struct ReloadKeysResponse {
    pub keys: usize,
}

pub async fn reload_keys_handler(
    Extension(state): Extension<AxumAppState>,
) -> ApiResult<ReloadKeysResponse> {
    let keys = actions::reload_keys(&state.deps).await?;
    Ok(Json(ReloadKeysResponse { keys }))
}

pub async fn wake_handler(Extension(state): Extension<AxumAppState>) -> StatusCode {
    state.scheduler.wake();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct TelegramTestBody {
    pub token: Option<String>,
    #[serde(alias = "chatId")]
    pub chat_id: Option<String>,
}

impl TelegramTestBody {
    /// Both fields present and non-blank.
    pub fn into_options(self) -> Result<TelegramOptions, ControlError> {
        let present = |v: Option<String>| v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        match (present(self.token), present(self.chat_id)) {
            (Some(bot_token), Some(chat_id)) => Ok(TelegramOptions { bot_token, chat_id }),
            _ => Err(ControlError::InvalidRequest(
                "token and chat_id are required".to_string(),
            )),
        }
    }
}

/// Check a bot token and chat id before they are saved to settings.
pub async fn test_telegram_handler(Json(body): Json<TelegramTestBody>) -> ApiResult<ConnectionTest> {
    let options = body.into_options()?;
    let result = TelegramService::new(options).test_connection().await;
    tracing::info!(success = result.success, "Telegram connection test");
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn control_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(status_for(&ControlError::JobNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&ControlError::AlreadyProcessing(id)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ControlError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ControlError::NoKeysConfigured),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ControlError::Internal(anyhow::anyhow!("db down"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn telegram_test_requires_token_and_chat() {
        let body: TelegramTestBody =
            serde_json::from_value(json!({ "token": "123:abc", "chatId": "-100" })).unwrap();
        let options = body.into_options().unwrap();
        assert_eq!(options.bot_token, "123:abc");
        assert_eq!(options.chat_id, "-100");

        for body in [
            json!({ "token": "123:abc" }),
            json!({ "token": "  ", "chat_id": "-100" }),
            json!({}),
        ] {
            let body: TelegramTestBody = serde_json::from_value(body).unwrap();
            assert!(matches!(
                body.into_options(),
                Err(ControlError::InvalidRequest(_))
            ));
        }
    }
}
