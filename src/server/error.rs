use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::models::ResolutionStage;

pub type AppResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // never reaches a caller on its own, the locator falls back to the default origin
    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    #[error("resolution failed at stage {stage}: {detail}")]
    ResolutionFailed {
        stage: ResolutionStage,
        detail: String,
    },

    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("could not resolve channel {channel_id} after reset: {source}")]
    RecoveryExhausted {
        channel_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn resolution(stage: ResolutionStage, detail: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            stage,
            detail: detail.into(),
        }
    }

    /// stage of a resolution failure, looks through recovery
    pub fn stage(&self) -> Option<ResolutionStage> {
        match self {
            Self::ResolutionFailed { stage, .. } => Some(*stage),
            Self::RecoveryExhausted { source, .. } => source.stage(),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("responding {}: {}", status, self);
        }
        (status, self.to_string()).into_response()
    }
}
