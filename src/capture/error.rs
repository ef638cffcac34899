use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Terminal failures of the capture pipeline.
///
/// A filtered request is not represented here; it is a successful,
/// non-recording outcome.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Client not found")]
    TenantNotFound,
    #[error("Invalid domain for client")]
    DomainNotAuthorized,
    #[error("Invalid capture payload")]
    InvalidPayload,
    #[error("capture persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

impl CaptureError {
    pub fn status(&self) -> StatusCode {
        match self {
            CaptureError::TenantNotFound | CaptureError::DomainNotAuthorized => {
                StatusCode::FORBIDDEN
            }
            CaptureError::InvalidPayload => StatusCode::BAD_REQUEST,
            CaptureError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            CaptureError::Persistence(err) => {
                let message = format!("{err:#}");
                tracing::error!(error = %message, "capture request failed");
                (status, "Internal server error").into_response()
            }
            rejection => {
                tracing::debug!(reason = %rejection, "capture request rejected");
                (status, rejection.to_string()).into_response()
            }
        }
    }
}
