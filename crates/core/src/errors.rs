use thiserror::Error;

/// Recoverable tool-level failures. These are serialized back into the
/// planning context so the model can apologize, retry, or ask for
/// clarification instead of aborting the turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown product: {0}")]
    ProductNotFound(String),
    #[error("catalog retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ToolError {
    /// Stable machine-readable tag used when the error is serialized back
    /// into the model's planning context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ProductNotFound(_) => "product_not_found",
            Self::RetrievalUnavailable(_) => "retrieval_unavailable",
            Self::Persistence(_) => "persistence_failure",
        }
    }
}

/// Turn- or service-fatal failures. `IndexUnavailable` blocks serving
/// entirely; the rest terminate a single turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("turn exceeded its deadline after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },
    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("catalog index unavailable: {0}")]
    IndexUnavailable(String),
}

/// What the HTTP caller receives when a turn cannot produce a reply.
/// Always a typed object, never a raw internal error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("request timed out: {message}")]
    Timeout { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl ApiError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested session does not exist.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Timeout { .. } => "The request took too long. Please try again.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::BadRequest { .. } => "bad_request",
            Self::Timeout { .. } => "timeout",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl TurnError {
    pub fn into_api(self, correlation_id: impl Into<String>) -> ApiError {
        let correlation_id = correlation_id.into();
        match self {
            Self::SessionNotFound(id) => {
                ApiError::NotFound { message: format!("session `{id}` not found"), correlation_id }
            }
            Self::Timeout { elapsed_secs } => ApiError::Timeout {
                message: format!("turn aborted after {elapsed_secs}s"),
                correlation_id,
            },
            Self::ModelUnavailable(message) | Self::IndexUnavailable(message) => {
                ApiError::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApiError, TurnError};

    #[test]
    fn session_not_found_maps_to_not_found_api_error() {
        let api = TurnError::SessionNotFound("abc".to_owned()).into_api("req-1");

        assert!(matches!(
            api,
            ApiError::NotFound { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(api.user_message(), "The requested session does not exist.");
    }

    #[test]
    fn timeout_maps_to_timeout_api_error() {
        let api = TurnError::Timeout { elapsed_secs: 30 }.into_api("req-2");

        assert!(matches!(api, ApiError::Timeout { .. }));
        assert_eq!(api.kind(), "timeout");
    }

    #[test]
    fn index_unavailable_maps_to_service_unavailable() {
        let api = TurnError::IndexUnavailable("catalog missing".to_owned()).into_api("req-3");

        assert!(matches!(api, ApiError::ServiceUnavailable { .. }));
        assert_eq!(
            api.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
