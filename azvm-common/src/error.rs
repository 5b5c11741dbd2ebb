use crate::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a resource-management client.
///
/// Every variant is fatal to a provisioning run: nothing here is retried
/// locally, the only recovery is tearing down the resource group.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to create {kind} '{name}': {source}")]
    ResourceCreationFailed {
        kind: ResourceKind,
        name: String,
        #[source]
        source: Box<CloudError>,
    },

    /// The service refused the request (invalid state transition, conflict,
    /// validation error) or the long-running operation ended in failure.
    #[error("{operation} rejected by service{}: {message}", code_suffix(.code))]
    OperationRejectedByService {
        operation: String,
        code: Option<String>,
        message: String,
    },

    #[error("{operation} did not reach a terminal state within {after:?}")]
    OperationTimedOut { operation: String, after: Duration },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response payload: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

impl CloudError {
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::OperationRejectedByService {
            operation: operation.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap a failure as the creation failure of `kind`/`name`.
    pub fn creation_failed(self, kind: ResourceKind, name: impl Into<String>) -> Self {
        CloudError::ResourceCreationFailed {
            kind,
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Stable short label, used in action logs.
    pub fn label(&self) -> &'static str {
        match self {
            CloudError::ResourceCreationFailed { .. } => "ResourceCreationFailed",
            CloudError::OperationRejectedByService { .. } => "OperationRejectedByService",
            CloudError::OperationTimedOut { .. } => "OperationTimedOut",
            CloudError::NotFound { .. } => "NotFound",
            CloudError::Authentication(_) => "Authentication",
            CloudError::Transport(_) => "Transport",
            CloudError::Decode(_) => "Decode",
        }
    }

    /// Innermost cause, looking through `ResourceCreationFailed` wrappers.
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::ResourceCreationFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_failure_keeps_root_cause() {
        let err = CloudError::rejected("PUT subnet", "address prefix overlaps")
            .creation_failed(ResourceKind::Subnet, "sn1");
        assert_eq!(err.label(), "ResourceCreationFailed");
        assert_eq!(err.root().label(), "OperationRejectedByService");
        let text = err.to_string();
        assert!(text.contains("subnet 'sn1'"));
        assert!(text.contains("address prefix overlaps"));
    }

    #[test]
    fn rejection_message_includes_code_when_present() {
        let err = CloudError::OperationRejectedByService {
            operation: "PUT disk".to_string(),
            code: Some("OperationNotAllowed".to_string()),
            message: "disk is attached to a running VM".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "PUT disk rejected by service (OperationNotAllowed): disk is attached to a running VM"
        );
    }
}
