pub mod api;
pub mod dtos;
pub mod error;
pub mod services;
pub mod utils;

use std::{sync::Arc, time::Instant};

use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::{Layer, ServiceBuilder};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use api::{
    health_controller::health_endpoint, hls_controller::HlsController,
    streams_controller::StreamsController,
};
use error::{AppResult, Error};
use services::edge_services::EdgeServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if cors_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors_origin
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring bad cors origin {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

/// all routes with their layers, the services go in as an Extension
pub fn router(services: EdgeServices) -> Router {
    let cors = cors_layer(&services.config.cors_origin);

    Router::new()
        .route("/health", get(health_endpoint))
        .nest("/hls", HlsController::app())
        .nest("/api/v1", StreamsController::app())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(services)),
        )
}

pub struct EdgeApplicationServer;

impl EdgeApplicationServer {
    pub async fn serve(config: Arc<AppConfig>) -> AppResult<()> {
        Lazy::force(&START_TIME);

        let services = EdgeServices::new(config.clone()).await?;
        let origin = services.resolver.current_origin();

        // trailing slashes have to be trimmed before routing, so this wraps the router instead of
        // being one of its layers
        let app = NormalizePathLayer::trim_trailing_slash().layer(router(services));

        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            Error::InternalServerErrorWithContext(format!("failed to bind {}: {}", address, e))
        })?;

        info!(
            "relay listening on {} (origin {}, env {:?})",
            address, origin.base_url, config.cargo_env
        );

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::InternalServerErrorWithContext(format!("server error: {}", e)))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down relay...");
}
