use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;

use crate::server::dtos::health_dto::{HealthResponse, HealthStatus, OriginHealth};
use crate::server::services::edge_services::EdgeServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// liveness only, nothing here talks to upstream. degraded means the bootstrap document couldn't
/// be used and the default origin is in play, requests are still served
pub async fn health_endpoint(
    Extension(services): Extension<EdgeServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let origin = services.resolver.current_origin();

    let status = if origin.from_fallback {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        origin: OriginHealth {
            base_url: origin.base_url,
            schedule_url: origin.schedule_url,
            from_fallback: origin.from_fallback,
        },
        cached_streams: services.resolver.cached_streams(),
    };

    (StatusCode::OK, Json(response))
}
