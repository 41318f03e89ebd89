use miette::Diagnostic;
use thiserror::Error;

use crate::connection::Platform;

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Authentication with {platform} failed")]
    #[diagnostic(
        code(beacon_core::auth_failure),
        help("The stored credential is invalid, expired or revoked. Reconnect {platform}")
    )]
    AuthFailure { platform: Platform, details: String },

    #[error("Request to {target} failed during {operation}")]
    #[diagnostic(
        code(beacon_core::transient_network_failure),
        help("The remote service did not answer successfully: {details}")
    )]
    TransientNetworkFailure {
        target: String,
        operation: String,
        details: String,
    },

    #[error("Rate limit exceeded")]
    #[diagnostic(
        code(beacon_core::rate_limited),
        help("Wait {retry_after_ms} ms before sending another message")
    )]
    RateLimited {
        actor: String,
        limit: u32,
        retry_after_ms: u64,
    },

    #[error("Validation failed for {field}")]
    #[diagnostic(code(beacon_core::validation_failure), help("{message}"))]
    ValidationFailure { field: String, message: String },

    #[error("{entity} not found")]
    #[diagnostic(
        code(beacon_core::not_found),
        help("No {entity} exists with id '{id}'")
    )]
    NotFound { entity: String, id: String },

    #[error("Permission denied")]
    #[diagnostic(
        code(beacon_core::permission_denied),
        help("User {user_id} doesn't have access to {resource}")
    )]
    PermissionDenied { user_id: String, resource: String },

    #[error("OAuth operation failed")]
    #[diagnostic(
        code(beacon_core::oauth_error),
        help("{operation} against {platform} failed: {details}")
    )]
    OAuthError {
        platform: Platform,
        operation: String,
        details: String,
    },

    #[error("Model provider error")]
    #[diagnostic(
        code(beacon_core::model_provider_error),
        help("Check API credentials and rate limits for {provider}")
    )]
    ModelProviderError {
        provider: String,
        model: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Database query failed")]
    #[diagnostic(code(beacon_core::database_query_failed), help("Query: {query}"))]
    DatabaseQueryFailed {
        query: String,
        table: String,
        #[source]
        cause: surrealdb::Error,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(beacon_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Configuration error")]
    #[diagnostic(
        code(beacon_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn auth_failure(platform: Platform, details: impl Into<String>) -> Self {
        Self::AuthFailure {
            platform,
            details: details.into(),
        }
    }

    pub fn transient(
        target: impl Into<String>,
        operation: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::TransientNetworkFailure {
            target: target.into(),
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn permission_denied(user_id: impl ToString, resource: impl Into<String>) -> Self {
        Self::PermissionDenied {
            user_id: user_id.to_string(),
            resource: resource.into(),
        }
    }

    pub fn oauth(platform: Platform, operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::OAuthError {
            platform,
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn model_error(
        provider: impl Into<String>,
        model: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelProviderError {
            provider: provider.into(),
            model: model.into(),
            cause: Box::new(cause),
        }
    }

    pub fn database(query: impl Into<String>, table: impl Into<String>, cause: surrealdb::Error) -> Self {
        Self::DatabaseQueryFailed {
            query: query.into(),
            table: table.into(),
            cause,
        }
    }

    pub fn serialization(data_type: impl Into<String>, cause: serde_json::Error) -> Self {
        Self::SerializationError {
            data_type: data_type.into(),
            cause,
        }
    }

    /// Credential problems the user can fix by reconnecting.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    /// Failures that say nothing about the credential itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientNetworkFailure { .. } | Self::ModelProviderError { .. }
        )
    }

    /// Short message safe to surface inline in a chat stream.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthFailure { platform, .. } => {
                format!("Your {} connection needs to be reconnected.", platform.display_name())
            }
            Self::RateLimited { retry_after_ms, .. } => format!(
                "Rate limit exceeded. Please wait {} seconds before sending another message.",
                retry_after_ms.div_ceil(1000)
            ),
            Self::ValidationFailure { message, .. } => message.clone(),
            Self::ModelProviderError { .. } | Self::TransientNetworkFailure { .. } => {
                "The assistant is temporarily unavailable. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
