//! Response envelope shared by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Machine-readable error codes surfaced to API clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The supplied address failed hex validation.
    InvalidAddress,
    /// No such agent.
    AgentNotFound,
    /// No such report.
    ReportNotFound,
    /// A body or query parameter failed validation.
    InvalidInput,
    /// The client exceeded its request budget.
    RateLimited,
    /// Unexpected internal failure; details stay in the logs.
    Internal,
}

impl ErrorCode {
    /// HTTP status the code maps to.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidAddress | Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::AgentNotFound | Self::ReportNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error half of the envelope.
#[derive(Clone, Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message, safe for clients.
    pub message: String,
}

/// Pagination block attached to list responses.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: usize,
    /// Page size.
    pub limit: usize,
    /// Total matching records.
    pub total: usize,
    /// Total pages at this limit.
    pub total_pages: usize,
}

impl Pagination {
    /// Builds a pagination block.
    #[must_use]
    pub const fn new(page: usize, limit: usize, total: usize) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// The `{success, data?, error?, pagination?}` envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    /// Pagination for list payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T: Serialize> Envelope<T> {
    /// Success envelope.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pagination: None,
        }
    }

    /// Success envelope with pagination.
    #[must_use]
    pub const fn ok_paged(data: T, pagination: Pagination) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pagination: Some(pagination),
        }
    }
}

impl Envelope<serde_json::Value> {
    /// Failure envelope.
    #[must_use]
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
            pagination: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = self
            .error
            .as_ref()
            .map_or(StatusCode::OK, |error| error.code.status());
        (status, Json(self)).into_response()
    }
}

/// Shorthand for an error response.
pub(crate) fn failure(code: ErrorCode, message: impl Into<String>) -> Response {
    Envelope::err(code, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_statuses() {
        assert_eq!(ErrorCode::InvalidAddress.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::AgentNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn pagination_rounds_up() {
        let pagination = Pagination::new(1, 20, 41);
        assert_eq!(pagination.total_pages, 3);
    }

    #[test]
    fn envelope_serializes_without_empty_fields() {
        let envelope = Envelope::ok(serde_json::json!({"x": 1}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }
}
