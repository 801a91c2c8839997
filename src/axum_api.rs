use crate::errors::OtpError;
use crate::service::OtpService;
use axum::{
    extract::{Json, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub otp_service: Arc<OtpService>,
}

#[derive(Deserialize)]
pub struct RequestOtpRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    #[serde(alias = "otp")]
    pub code: String,
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

impl IntoResponse for OtpError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            err if err.is_operational() => (
                StatusCode::SERVICE_UNAVAILABLE,
                "OTP service is not available",
            ),
            OtpError::InvalidIdentity => (StatusCode::BAD_REQUEST, "Invalid email address"),
            OtpError::InvalidCode => (StatusCode::BAD_REQUEST, "OTP verification failed"),
            OtpError::Throttled { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Please wait before requesting another OTP",
            ),
            _ => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many failed attempts, request a new OTP",
            ),
        };

        let body = match &self {
            OtpError::Throttled { reason, .. } => Json(serde_json::json!({
                "error": error_message,
                "reason": reason.as_str(),
            })),
            _ => Json(serde_json::json!({ "error": error_message })),
        };

        let mut response = (status, body).into_response();
        if let Some(wait) = self.retry_after() {
            let secs = retry_after_secs(wait);
            if secs > 0 {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}

pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<RequestOtpRequest>,
) -> Result<Json<serde_json::Value>, OtpError> {
    state.otp_service.issue(&payload.email).await?;
    Ok(Json(
        serde_json::json!({ "message": "OTP sent successfully" }),
    ))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<serde_json::Value>, OtpError> {
    state
        .otp_service
        .verify(&payload.email, &payload.code)
        .await?;
    Ok(Json(serde_json::json!({ "message": "OTP verified" })))
}

pub fn otp_router(otp_service: Arc<OtpService>) -> Router {
    let state = AppState { otp_service };
    Router::new()
        .route("/request-otp", post(request_otp))
        .route("/verify-otp", post(verify_otp))
        .with_state(state)
}
