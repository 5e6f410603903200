use axum::{
    Extension, Json, Router,
    extract::Path,
    routing::{delete, get},
};
use tracing::info;

use crate::server::{
    dtos::stream_dto::{CacheResetResponse, StreamResponse},
    error::{AppResult, Error},
    services::edge_services::EdgeServices,
};

pub struct StreamsController;

impl StreamsController {
    /// mounted under `/api/v1`. the reset lives outside `/streams` so every id under it is a
    /// channel, `cache` included
    pub fn app() -> Router {
        Router::new()
            .route("/streams/{channel_id}", get(Self::get_stream))
            .route("/cache", delete(Self::reset_cache))
    }

    /// resolves a channel the same way the relay would, handy for checking a channel by hand
    async fn get_stream(
        Extension(services): Extension<EdgeServices>,
        Path(channel_id): Path<String>,
    ) -> AppResult<Json<StreamResponse>> {
        if channel_id.trim().is_empty() {
            return Err(Error::BadRequest("channel id is empty".to_string()));
        }

        let stream = services.recovery.resolve_with_recovery(&channel_id).await?;
        Ok(Json(StreamResponse::new(&channel_id, stream)))
    }

    async fn reset_cache(
        Extension(services): Extension<EdgeServices>,
    ) -> AppResult<Json<CacheResetResponse>> {
        let origin = services.recovery.reset().await;
        info!("manual reset, origin is now {}", origin.base_url);

        Ok(Json(CacheResetResponse {
            origin: origin.base_url,
            schedule_url: origin.schedule_url,
        }))
    }
}
