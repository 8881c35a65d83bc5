//! Endpoint management, test deliveries, delivery log and circuit control.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use domain::models::{
    CreateEndpointRequest, CreateEndpointResponse, DeliveryQuery, EndpointResponse,
    UpdateEndpointRequest,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ListEndpointsResponse {
    pub endpoints: Vec<EndpointResponse>,
}

/// POST /api/v1/forms/:form_id/endpoints
///
/// The signing secret is only ever returned here.
pub async fn create_endpoint(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = state.engine.create_endpoint(form_id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateEndpointResponse::from(endpoint)),
    ))
}

/// GET /api/v1/forms/:form_id/endpoints
pub async fn list_endpoints(
    State(state): State<AppState>,
    Path(form_id): Path<Uuid>,
) -> Result<Json<ListEndpointsResponse>, ApiError> {
    let endpoints = state.engine.list_endpoints(form_id).await?;
    Ok(Json(ListEndpointsResponse {
        endpoints: endpoints.into_iter().map(EndpointResponse::from).collect(),
    }))
}

/// GET /api/v1/forms/:form_id/endpoints/:endpoint_id
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<EndpointResponse>, ApiError> {
    let endpoint = state.engine.get_endpoint(form_id, endpoint_id).await?;
    Ok(Json(endpoint.into()))
}

/// PUT /api/v1/forms/:form_id/endpoints/:endpoint_id
pub async fn update_endpoint(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateEndpointRequest>,
) -> Result<Json<EndpointResponse>, ApiError> {
    let endpoint = state
        .engine
        .update_endpoint(form_id, endpoint_id, request)
        .await?;
    Ok(Json(endpoint.into()))
}

/// DELETE /api/v1/forms/:form_id/endpoints/:endpoint_id
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_endpoint(form_id, endpoint_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/forms/:form_id/endpoints/:endpoint_id/test
///
/// Sends a synthetic event and waits for the result.
pub async fn test_endpoint(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.engine.test_endpoint(form_id, endpoint_id).await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesParams {
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListDeliveriesResponse<T> {
    pub deliveries: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/v1/forms/:form_id/endpoints/:endpoint_id/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<DeliveriesParams>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.get_endpoint(form_id, endpoint_id).await?;

    let query = DeliveryQuery {
        form_id: Some(form_id),
        endpoint_id: Some(endpoint_id),
        success: params.success,
        physical_only: false,
        since: params.since,
        until: params.until,
        limit: params.limit,
        offset: params.offset,
    };
    let deliveries = state.engine.list_deliveries(&query).await?;

    Ok(Json(ListDeliveriesResponse {
        deliveries,
        limit: query.effective_limit(),
        offset: query.effective_offset(),
    }))
}

/// GET /api/v1/forms/:form_id/endpoints/:endpoint_id/circuit
pub async fn get_circuit(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.engine.circuit_status(form_id, endpoint_id).await?;
    Ok(Json(status))
}

/// DELETE /api/v1/forms/:form_id/endpoints/:endpoint_id/circuit
///
/// Manually closes the breaker.
pub async fn reset_circuit(
    State(state): State<AppState>,
    Path((form_id, endpoint_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.engine.reset_circuit(form_id, endpoint_id).await?;
    Ok(Json(status))
}
