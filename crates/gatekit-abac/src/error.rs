//! Error types for the ABAC engine.
//!
//! Every layer of the engine reports through [`AbacError`]; the entrance
//! flattens it into the user-visible [`ApiError`] `{code, message, detail}`
//! shape.

use serde::Serialize;

/// Errors that can occur during policy retrieval, evaluation, or translation.
#[derive(Debug, thiserror::Error)]
pub enum AbacError {
    /// The action does not exist, or does not belong to the request's system.
    #[error("Invalid action: {message}")]
    InvalidAction {
        /// Description of why the action is invalid.
        message: String,
    },

    /// The supplied resources do not satisfy the action's declared resource types.
    #[error("Invalid action resource: {message}")]
    InvalidActionResource {
        /// Description of the mismatch.
        message: String,
    },

    /// Internal pipeline signal: the survivor set became empty.
    ///
    /// Converted to `Eval = false` / `Query = {}` at the entrance; never
    /// surfaced to callers.
    #[error("no policies")]
    NoPolicies,

    /// The subject is unknown.
    ///
    /// Eval/Query treat this as a deny; QueryAuthPolicies surfaces it.
    #[error("subject not exists")]
    SubjectNotExists,

    /// The external resource provider could not supply attributes.
    #[error("Remote resource error: {message}")]
    RemoteResource {
        /// Description of the provider failure.
        message: String,
    },

    /// A cache backend operation failed.
    ///
    /// Readers downgrade to a direct storage query; this kind only surfaces
    /// when storage fails as well.
    #[error("Cache error: {message}")]
    Cache {
        /// Description of the cache failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// A stored expression could not be parsed or translated.
    #[error("Expression error: {message}")]
    Expression {
        /// Description of the parse/translate failure.
        message: String,
    },

    /// The request was canceled before completion.
    #[error("request canceled")]
    Canceled,

    /// The per-request or per-call deadline expired.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded {
        /// Which deadline expired.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AbacError {
    /// Creates a new `InvalidAction` error.
    #[must_use]
    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::InvalidAction {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidActionResource` error.
    #[must_use]
    pub fn invalid_action_resource(message: impl Into<String>) -> Self {
        Self::InvalidActionResource {
            message: message.into(),
        }
    }

    /// Creates a new `RemoteResource` error.
    #[must_use]
    pub fn remote_resource(message: impl Into<String>) -> Self {
        Self::RemoteResource {
            message: message.into(),
        }
    }

    /// Creates a new `Cache` error.
    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Expression` error.
    #[must_use]
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    /// Creates a new `DeadlineExceeded` error.
    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means "the caller has no permission"
    /// rather than "the request failed".
    ///
    /// Eval converts these into a negative decision instead of an error.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        matches!(self, Self::NoPolicies | Self::SubjectNotExists)
    }

    /// Returns `true` if this is a caller mistake (bad action, bad resources).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAction { .. } | Self::InvalidActionResource { .. }
        )
    }

    /// Returns `true` if this is an infrastructure failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Cache { .. }
                | Self::Storage { .. }
                | Self::RemoteResource { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns the stable machine code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAction { .. } => "invalid_action",
            Self::InvalidActionResource { .. } => "invalid_action_resource",
            Self::NoPolicies => "no_policies",
            Self::SubjectNotExists => "subject_not_exists",
            Self::RemoteResource { .. } => "remote_resource_failure",
            Self::Cache { .. } => "cache_failure",
            Self::Storage { .. } => "storage_failure",
            Self::Expression { .. } => "expression_invalid",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Configuration { .. } => "configuration_invalid",
            Self::Internal { .. } => "internal",
        }
    }

    /// Flattens the error into the user-visible `{code, message, detail}` form.
    #[must_use]
    pub fn to_api_error(&self) -> ApiError {
        ApiError {
            code: self.code().to_string(),
            message: self.to_string(),
            detail: None,
        }
    }
}

/// User-visible error shape produced at the entrance.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Stable machine code (see [`AbacError::code`]).
    pub code: String,

    /// Human-readable message.
    pub message: String,

    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AbacError::invalid_action("job:viewx not registered");
        assert_eq!(err.to_string(), "Invalid action: job:viewx not registered");

        let err = AbacError::NoPolicies;
        assert_eq!(err.to_string(), "no policies");

        let err = AbacError::storage("connection refused");
        assert_eq!(err.to_string(), "Storage error: connection refused");
    }

    #[test]
    fn test_error_predicates() {
        assert!(AbacError::NoPolicies.is_deny());
        assert!(AbacError::SubjectNotExists.is_deny());
        assert!(!AbacError::storage("x").is_deny());

        assert!(AbacError::invalid_action("x").is_client_error());
        assert!(!AbacError::invalid_action("x").is_server_error());

        assert!(AbacError::cache("x").is_server_error());
        assert!(AbacError::remote_resource("x").is_server_error());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(AbacError::invalid_action("x").code(), "invalid_action");
        assert_eq!(AbacError::NoPolicies.code(), "no_policies");
        assert_eq!(
            AbacError::deadline_exceeded("eval").code(),
            "deadline_exceeded"
        );
    }

    #[test]
    fn test_to_api_error() {
        let api = AbacError::SubjectNotExists.to_api_error();
        assert_eq!(api.code, "subject_not_exists");
        assert_eq!(api.message, "subject not exists");
        assert!(api.detail.is_none());
    }
}
