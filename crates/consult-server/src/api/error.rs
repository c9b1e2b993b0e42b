//! HTTP mapping of engine errors

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use consult_core::Error as CoreError;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    /// Malformed request body or query
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },
    Unauthenticated(String),
    Forbidden,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            details: None,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest {
            message: err.to_string(),
            details: serde_json::to_value(&err).ok(),
        }
    }
}

/// 425 has no named constant in `http`
fn too_early() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::BAD_REQUEST)
}

struct Mapped {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
    retry_after: Option<u64>,
}

impl Mapped {
    fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
            details: None,
            retry_after: None,
        }
    }

    fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn map_core(err: CoreError) -> Mapped {
    let message = err.to_string();
    if err.is_temporal() {
        tracing::debug!("Temporal rejection: {}", message);
    }

    match err {
        CoreError::Validation(_) => Mapped::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
        CoreError::SlotTaken {
            conflicting_booking_id,
        } => Mapped::new(StatusCode::CONFLICT, "SLOT_TAKEN", message)
            .details(json!({ "conflicting_booking_id": conflicting_booking_id })),
        CoreError::Forbidden | CoreError::Unauthorized => {
            Mapped::new(StatusCode::FORBIDDEN, "FORBIDDEN", "Access denied".to_string())
        }
        CoreError::Unauthenticated(_) => Mapped::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "Missing or invalid credentials".to_string(),
        ),
        CoreError::NotFound(_) => Mapped::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
        CoreError::InvalidTransition { from, to } => {
            Mapped::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
                .details(json!({ "from": from, "to": to }))
        }
        CoreError::TooEarly {
            minutes_until_start,
        } => {
            let mut mapped = Mapped::new(too_early(), "TOO_EARLY", message)
                .details(json!({ "minutes_until_start": minutes_until_start }));
            mapped.retry_after = Some(minutes_until_start.max(0) as u64 * 60);
            mapped
        }
        CoreError::CallEnded => Mapped::new(StatusCode::GONE, "CALL_ENDED", message),
        CoreError::NotJoinable { status } => {
            Mapped::new(StatusCode::CONFLICT, "NOT_JOINABLE", message)
                .details(json!({ "status": status }))
        }
        CoreError::UnknownSetting(setting) => {
            Mapped::new(StatusCode::BAD_REQUEST, "UNKNOWN_SETTING", message)
                .details(json!({ "setting": setting }))
        }
        CoreError::ServiceUnavailable(reason) => {
            tracing::warn!("⚠️ Media transport unavailable: {}", reason);
            Mapped::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Media service temporarily unavailable".to_string(),
            )
        }
        other => {
            tracing::error!("Internal error: {}", other);
            Mapped::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mapped = match self {
            AppError::Core(err) => map_core(err),
            AppError::BadRequest { message, details } => Mapped {
                status: StatusCode::BAD_REQUEST,
                code: "BAD_REQUEST",
                message,
                details,
                retry_after: None,
            },
            AppError::Unauthenticated(message) => {
                Mapped::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
            }
            AppError::Forbidden => {
                Mapped::new(StatusCode::FORBIDDEN, "FORBIDDEN", "Access denied".to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: mapped.code.to_string(),
                message: mapped.message,
                details: mapped.details,
            },
        });

        let mut response = (mapped.status, body).into_response();
        if let Some(seconds) = mapped.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_core::BookingStatus;

    fn status_of(err: CoreError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(CoreError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(CoreError::SlotTaken {
                conflicting_booking_id: "b".to_string()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(CoreError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_of(CoreError::Unauthorized), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(CoreError::Unauthenticated("bad".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(CoreError::not_found("b")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Cancelled
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(CoreError::TooEarly { minutes_until_start: 3 }).as_u16(), 425);
        assert_eq!(status_of(CoreError::CallEnded), StatusCode::GONE);
        assert_eq!(
            status_of(CoreError::NotJoinable {
                status: BookingStatus::Cancelled
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CoreError::UnknownSetting("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(CoreError::ServiceUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(CoreError::internal("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_too_early_sets_retry_after() {
        let response = AppError::from(CoreError::TooEarly {
            minutes_until_start: 4,
        })
        .into_response();
        let retry_after = response.headers().get(header::RETRY_AFTER).unwrap();
        assert_eq!(retry_after.to_str().unwrap(), "240");
    }
}
