use snoozer_core::CoreError;
use std::collections::HashMap;
use snoozer_providers::ProviderError;
use thiserror::Error;
use tonic::Status;

/// Control plane specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlPlaneError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Instance already registered: {0}")]
    DuplicateInstance(String),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Deadline exceeded: {0}")]
    Timeout(String),
    #[error("Notification provider not found: {0}")]
    ProviderNotFound(String),
    #[error("Notification provider already registered: {0}")]
    DuplicateProvider(String),
    #[error("Notification provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlPlaneError {
    /// Conflicts and lookups the caller can act on, as opposed to failures
    /// of the call itself.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            ControlPlaneError::StorageError(_) | ControlPlaneError::Timeout(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ControlPlaneError::ValidationError(_) => "VALIDATION_ERROR",
            ControlPlaneError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ControlPlaneError::DuplicateInstance(_) => "DUPLICATE_INSTANCE",
            ControlPlaneError::InvalidTransition(_) => "INVALID_TRANSITION",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::Timeout(_) => "TIMEOUT",
            ControlPlaneError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            ControlPlaneError::DuplicateProvider(_) => "DUPLICATE_PROVIDER",
            ControlPlaneError::Provider { .. } => "PROVIDER_ERROR",
            ControlPlaneError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ControlPlaneError::ValidationError(msg),
            CoreError::InvalidTransition { from, to } => {
                ControlPlaneError::InvalidTransition(format!("{from} -> {to}"))
            }
            other => ControlPlaneError::ValidationError(other.to_string()),
        }
    }
}

impl From<ControlPlaneError> for snoozer_core::ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        let message = match &err {
            ControlPlaneError::ValidationError(msg)
            | ControlPlaneError::InstanceNotFound(msg)
            | ControlPlaneError::DuplicateInstance(msg)
            | ControlPlaneError::InvalidTransition(msg)
            | ControlPlaneError::StorageError(msg)
            | ControlPlaneError::Timeout(msg)
            | ControlPlaneError::ProviderNotFound(msg)
            | ControlPlaneError::DuplicateProvider(msg)
            | ControlPlaneError::Config(msg) => msg.clone(),
            ControlPlaneError::Provider { .. } => err.to_string(),
        };

        let response = snoozer_core::ErrorResponse::new(err.error_code(), message);
        match err {
            ControlPlaneError::Provider { provider, .. } => {
                response.with_details(HashMap::from([("provider".to_string(), provider)]))
            }
            _ => response,
        }
    }
}

impl From<ControlPlaneError> for Status {
    fn from(err: ControlPlaneError) -> Self {
        let message = err.to_string();
        match err {
            ControlPlaneError::ValidationError(_) => Status::invalid_argument(message),
            ControlPlaneError::InstanceNotFound(_) | ControlPlaneError::ProviderNotFound(_) => {
                Status::not_found(message)
            }
            ControlPlaneError::DuplicateInstance(_) | ControlPlaneError::DuplicateProvider(_) => {
                Status::already_exists(message)
            }
            ControlPlaneError::InvalidTransition(_) => Status::failed_precondition(message),
            ControlPlaneError::Timeout(_) => Status::deadline_exceeded(message),
            ControlPlaneError::StorageError(_)
            | ControlPlaneError::Provider { .. }
            | ControlPlaneError::Config(_) => Status::internal(message),
        }
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;

#[cfg(test)]
mod tests {
    use super::*;
    use snoozer_core::InstanceState;
    use tonic::Code;

    #[test]
    fn test_control_plane_error_instance_not_found() {
        let err = ControlPlaneError::InstanceNotFound("i-1".to_string());
        assert!(err.to_string().contains("not found"));
        assert!(err.is_business());
    }

    #[test]
    fn test_control_plane_error_conversion_to_error_response() {
        let err = ControlPlaneError::DuplicateInstance("i-1".to_string());
        let error_response: snoozer_core::ErrorResponse = err.into();
        assert_eq!(error_response.error_code, "DUPLICATE_INSTANCE");
        assert_eq!(error_response.message, "i-1");
        assert_eq!(error_response.details, None);
    }

    #[test]
    fn test_provider_error_response_keeps_provider_name() {
        let err = ControlPlaneError::Provider {
            provider: "webhook".to_string(),
            source: ProviderError::Config("'url' is required".to_string()),
        };
        let error_response: snoozer_core::ErrorResponse = err.into();
        assert_eq!(error_response.error_code, "PROVIDER_ERROR");
        assert!(error_response.message.contains("webhook"));
        assert_eq!(
            error_response.details.unwrap()["provider"],
            "webhook".to_string()
        );
    }

    #[test]
    fn test_core_error_conversion() {
        let err: ControlPlaneError = CoreError::InvalidTransition {
            from: InstanceState::Stopped,
            to: InstanceState::Idle,
        }
        .into();
        assert_eq!(
            err,
            ControlPlaneError::InvalidTransition("stopped -> idle".to_string())
        );

        let err: ControlPlaneError = CoreError::Validation("region cannot be empty".into()).into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ControlPlaneError::InstanceNotFound("x".into()), Code::NotFound),
            (ControlPlaneError::ValidationError("x".into()), Code::InvalidArgument),
            (ControlPlaneError::DuplicateInstance("x".into()), Code::AlreadyExists),
            (ControlPlaneError::Timeout("x".into()), Code::DeadlineExceeded),
            (ControlPlaneError::StorageError("x".into()), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn test_transport_failures_are_not_business() {
        assert!(!ControlPlaneError::Timeout("x".into()).is_business());
        assert!(!ControlPlaneError::StorageError("x".into()).is_business());
        assert!(ControlPlaneError::ValidationError("x".into()).is_business());
    }
}
