//! Analytics, live statistics, endpoint health and alerts.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use domain::models::{Alert, AnalyticsBucket, Granularity, HealthRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

const DEFAULT_ALERT_LIMIT: i64 = 50;
const MAX_ALERT_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub granularity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub form_id: Uuid,
    pub granularity: Granularity,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub buckets: Vec<AnalyticsBucket>,
}

/// GET /api/v1/forms/:form_id/analytics
///
/// Defaults to the last 24 hours for hourly buckets and the last 30 days
/// for daily ones.
pub async fn get_analytics(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let granularity = match params.granularity.as_deref() {
        None => Granularity::Hourly,
        Some(value) => value.parse().map_err(ApiError::Validation)?,
    };
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or_else(|| match granularity {
        Granularity::Hourly => to - Duration::hours(24),
        Granularity::Daily => to - Duration::days(30),
    });

    let buckets = state
        .analytics
        .get_analytics(form_id, from, to, granularity)
        .await?;

    Ok(Json(AnalyticsResponse {
        form_id,
        granularity,
        from,
        to,
        buckets,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/v1/forms/:form_id/analytics/errors
///
/// Defaults to the last 24 hours.
pub async fn error_breakdown(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - Duration::hours(24));
    let breakdown = state.analytics.error_breakdown(form_id, from, to).await?;
    Ok(Json(breakdown))
}

/// GET /api/v1/forms/:form_id/stats/realtime
pub async fn realtime_stats(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.analytics.realtime_stats(form_id, Utc::now()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct FormHealthResponse {
    pub form_id: Uuid,
    pub endpoints: Vec<HealthRecord>,
}

/// GET /api/v1/forms/:form_id/health
pub async fn form_health(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
) -> Result<Json<FormHealthResponse>, ApiError> {
    let endpoints = state.health.form_health(form_id).await?;
    Ok(Json(FormHealthResponse { form_id, endpoints }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsParams {
    #[serde(default)]
    pub include_acknowledged: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListAlertsResponse {
    pub alerts: Vec<Alert>,
}

/// GET /api/v1/forms/:form_id/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
    Query(params): Query<AlertsParams>,
) -> Result<Json<ListAlertsResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);
    let alerts = state
        .engine
        .list_alerts(form_id, params.include_acknowledged, limit)
        .await?;
    Ok(Json(ListAlertsResponse { alerts }))
}

/// POST /api/v1/alerts/:alert_id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state.engine.acknowledge_alert(alert_id).await?;
    Ok(Json(alert))
}
