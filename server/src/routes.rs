use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    routing::{get, post, put},
};
use chrono::Utc;
use chrono_tz::Tz;
use engagement_core::{Criteria, Quality};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::response::AppError;
use crate::service::{
    AchievementView, EngagementService, ReviewOutcome, ReviewStatistics, ServiceResult,
    StreakStatus, StudyOutcome, UnlockedAchievement,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TIMEZONE_HEADER: &str = "x-timezone";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EngagementService>,
}

#[derive(Debug, Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

type ApiResult<T> = Result<Json<SuccessResponse<T>>, AppError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(SuccessResponse {
        success: true,
        data,
    }))
}

#[derive(Debug, Deserialize)]
struct ReviewQuery {
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetricRequest {
    criteria: String,
    value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DueWords {
    date: chrono::NaiveDate,
    word_ids: Vec<Uuid>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/review/due", get(due_words))
        .route("/review/statistics", get(review_statistics))
        .route("/review/:word_id", put(review_word))
        .route("/learning-streaks/record", post(record_study))
        .route("/learning-streaks/current", get(current_streak))
        .route("/learning-streaks/longest", get(longest_streak))
        .route("/learning-streaks/status", get(streak_status))
        .route("/achievements", get(achievements))
        .route("/achievements/metrics", post(report_metric))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized("missing X-User-Id header"))
}

/// The learner's IANA zone from `X-Timezone`, falling back to UTC.
pub fn request_timezone(headers: &HeaderMap) -> Tz {
    let Some(raw) = headers
        .get(TIMEZONE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        debug!("no X-Timezone header, using UTC");
        return Tz::UTC;
    };
    raw.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = raw, "unrecognized X-Timezone header, using UTC");
        Tz::UTC
    })
}

/// Store calls block, so they run off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, AppError>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::internal(format!("blocking task failed: {err}")))?
        .map_err(AppError::from)
}

async fn review_word(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(word_id): Path<Uuid>,
    Query(query): Query<ReviewQuery>,
) -> ApiResult<ReviewOutcome> {
    let user = user_id(&headers)?;
    let quality = query
        .quality
        .as_deref()
        .ok_or_else(|| AppError::validation("quality is required"))?
        .trim()
        .parse::<i32>()
        .map_err(|_| AppError::validation("quality must be an integer between 0 and 5"))?;
    Quality::try_from(quality).map_err(|err| AppError::validation(err.to_string()))?;

    let service = state.service.clone();
    let now = Utc::now();
    ok(run_blocking(move || service.review_word(&user, word_id, quality, now)).await?)
}

async fn due_words(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<DueWords> {
    let user = user_id(&headers)?;
    let service = state.service.clone();
    let date = Utc::now().date_naive();
    let word_ids = run_blocking(move || service.due_words(&user, date)).await?;
    ok(DueWords { date, word_ids })
}

async fn review_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ReviewStatistics> {
    let user = user_id(&headers)?;
    let service = state.service.clone();
    let today = Utc::now().date_naive();
    ok(run_blocking(move || service.review_statistics(&user, today)).await?)
}

async fn record_study(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StudyOutcome> {
    let user = user_id(&headers)?;
    let tz = request_timezone(&headers);
    let service = state.service.clone();
    let now = Utc::now();
    ok(run_blocking(move || service.record_study(&user, &tz, now)).await?)
}

async fn current_streak(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<u32> {
    let user = user_id(&headers)?;
    let service = state.service.clone();
    ok(run_blocking(move || service.current_streak(&user)).await?)
}

async fn longest_streak(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<u32> {
    let user = user_id(&headers)?;
    let service = state.service.clone();
    ok(run_blocking(move || service.longest_streak(&user)).await?)
}

async fn streak_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StreakStatus> {
    let user = user_id(&headers)?;
    let tz = request_timezone(&headers);
    let service = state.service.clone();
    let now = Utc::now();
    ok(run_blocking(move || service.streak_status(&user, &tz, now)).await?)
}

async fn achievements(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<AchievementView>> {
    let user = user_id(&headers)?;
    let service = state.service.clone();
    ok(run_blocking(move || service.achievement_overview(&user)).await?)
}

async fn report_metric(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MetricRequest>, JsonRejection>,
) -> ApiResult<Vec<UnlockedAchievement>> {
    let user = user_id(&headers)?;
    let Json(request) = body.map_err(|rejection| AppError::validation(rejection.body_text()))?;
    let criteria = request
        .criteria
        .parse::<Criteria>()
        .map_err(|err| AppError::validation(err.to_string()))?;
    let service = state.service.clone();
    let now = Utc::now();
    ok(run_blocking(move || service.report_metric(&user, criteria, request.value, now)).await?)
}
