//! API error types

use beacon_core::CoreError;
use miette::{Diagnostic, JSONReportHandler};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API error response
#[derive(Debug, thiserror::Error, Diagnostic, Serialize, Deserialize)]
pub enum ApiError {
    /// Request validation failed
    #[error("Validation failed: {message}")]
    #[diagnostic(
        code(api::validation_error),
        help("Check the field errors for specific validation issues")
    )]
    ValidationError {
        message: String,
        fields: Option<Vec<FieldError>>,
    },

    /// Authentication required
    #[error("Authentication required")]
    #[diagnostic(
        code(api::unauthorized),
        help("Please provide a valid bearer token")
    )]
    Unauthorized { message: Option<String> },

    /// A platform rejected the stored credential
    #[error("{message}")]
    #[diagnostic(
        code(api::reconnect_required),
        help("Reconnect {platform} from the client's settings")
    )]
    ReconnectRequired { platform: String, message: String },

    /// Insufficient permissions
    #[error("Insufficient permissions")]
    #[diagnostic(
        code(api::forbidden),
        help("You don't have access to {resource}")
    )]
    Forbidden { resource: String },

    /// Resource not found
    #[error("Resource not found: {resource_type}")]
    #[diagnostic(
        code(api::not_found),
        help("The {resource_type} with ID '{resource_id}' does not exist")
    )]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    #[diagnostic(
        code(api::rate_limit),
        help("Please wait {retry_after_seconds} seconds before retrying")
    )]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// A platform or token endpoint failed
    #[error("{message}")]
    #[diagnostic(code(api::upstream_error), help("An external service failed"))]
    Upstream { message: String, json: String },

    /// Core error from beacon-core
    #[error("{message}")]
    #[diagnostic(code(api::core_error), help("Core operation failed"))]
    Core { message: String, json: String },

    /// JSON error
    #[error("{message}")]
    #[diagnostic(
        code(api::json_error),
        help("Check that your JSON is valid and matches the expected schema")
    )]
    Json { message: String, json: String },

    /// Invalid date
    #[error("Invalid date: {0}")]
    #[diagnostic(
        code(api::datetime_error),
        help("Dates are expected in YYYY-MM-DD format")
    )]
    DateTime(String),

    /// Service temporarily unavailable
    #[error("Service temporarily unavailable")]
    #[diagnostic(
        code(api::service_unavailable),
        help("The assistant or a dependency is temporarily unavailable")
    )]
    ServiceUnavailable { retry_after_seconds: Option<u64> },
}

/// Field-level validation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized { .. } => 401,
            ApiError::ReconnectRequired { .. } => 401,
            ApiError::Forbidden { .. } => 403,
            ApiError::NotFound { .. } => 404,
            ApiError::RateLimitExceeded { .. } => 429,
            ApiError::Upstream { .. } => 502,
            ApiError::ServiceUnavailable { .. } => 503,

            // Beacon-core errors
            ApiError::Core { .. } => 500,

            // External errors
            ApiError::Json { .. } => 400,
            ApiError::DateTime(_) => 400,
        }
    }

    /// Short machine-readable name used in response bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::ValidationError { .. } => "validation_error",
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::ReconnectRequired { .. } => "reconnect_required",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::NotFound { .. } => "not_found",
            ApiError::RateLimitExceeded { .. } => "rate_limit",
            ApiError::Upstream { .. } => "upstream_error",
            ApiError::Core { .. } => "core_error",
            ApiError::Json { .. } => "json_error",
            ApiError::DateTime(_) => "datetime_error",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            fields: None,
        }
    }

    /// Create a validation error with field-specific errors
    pub fn validation_with_fields(message: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self::ValidationError {
            message: message.into(),
            fields: Some(fields),
        }
    }

    /// Create a not found error
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: Some(message.into()),
        }
    }
}

fn render_json(err: &dyn Diagnostic) -> String {
    let mut json = String::new();
    JSONReportHandler::new()
        .render_report(&mut json, err)
        .unwrap_or_default();
    json
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationFailure { field, message } => Self::ValidationError {
                message: message.clone(),
                fields: Some(vec![FieldError { field, message }]),
            },
            CoreError::AuthFailure { platform, .. } => Self::ReconnectRequired {
                platform: platform.display_name().to_string(),
                message: err.user_message(),
            },
            CoreError::NotFound { entity, id } => Self::NotFound {
                resource_type: entity,
                resource_id: id,
            },
            CoreError::PermissionDenied { resource, .. } => Self::Forbidden { resource },
            CoreError::RateLimited { retry_after_ms, .. } => Self::RateLimitExceeded {
                retry_after_seconds: retry_after_ms.div_ceil(1000),
            },
            CoreError::ModelProviderError { .. } => Self::ServiceUnavailable {
                retry_after_seconds: None,
            },
            CoreError::TransientNetworkFailure { .. } | CoreError::OAuthError { .. } => {
                Self::Upstream {
                    message: err.to_string(),
                    json: render_json(&err),
                }
            }
            other => Self::Core {
                message: other.to_string(),
                json: render_json(&other),
            },
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        let diagnostic = miette::miette!(
            code = "json::parse_error",
            help = "Check that your JSON is valid",
            "{}",
            err
        );

        Self::Json {
            message: err.to_string(),
            json: render_json(diagnostic.as_ref()),
        }
    }
}

impl From<chrono::ParseError> for ApiError {
    fn from(err: chrono::ParseError) -> Self {
        Self::DateTime(err.to_string())
    }
}

// Server-side response conversion
#[cfg(feature = "server")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::{HeaderValue, StatusCode, header};

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let detail = match &self {
            ApiError::Upstream { json, .. }
            | ApiError::Core { json, .. }
            | ApiError::Json { json, .. } => Some(json),
            _ => None,
        };

        let mut error_obj = serde_json::json!({
            "type": self.error_type(),
            "message": self.to_string(),
        });

        if let Some(d) = detail {
            error_obj["detail"] = serde_json::to_value(d).unwrap_or_default();
        }
        if let ApiError::ValidationError {
            fields: Some(fields),
            ..
        } = &self
        {
            error_obj["fields"] = serde_json::to_value(fields).unwrap_or_default();
        }

        let body = serde_json::json!({
            "error": error_obj,
            "timestamp": chrono::Utc::now(),
        });

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimitExceeded {
            retry_after_seconds,
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
