use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rtcrelay_media::RecordError;
use serde_json::json;
use thiserror::Error;

use crate::sfu::EngineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Upgrade(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Failure of a single publish or subscribe request
#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordError),
}

pub type Result<T> = std::result::Result<T, AppError>;
