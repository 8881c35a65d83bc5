//! Event ingestion.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use domain::models::PublishRequest;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::rate_limit::client_ip;

/// POST /api/v1/events
///
/// Accepts an event for asynchronous delivery. Without an explicit `source`
/// the caller's IP is used for source-level rate limiting.
pub async fn publish_event(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(mut request): Json<PublishRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.source.is_none() {
        let peer = connect.map(|ConnectInfo(addr)| addr);
        request.source = Some(client_ip(&headers, peer).to_string());
    }

    let form_id = request.form_id;
    let event_type = request.event_type.clone();
    let receipt = state.engine.publish(request).await?;

    info!(
        event_id = %receipt.event_id,
        form_id = %form_id,
        event_type = %event_type,
        endpoint_count = receipt.endpoint_count,
        "Event accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
