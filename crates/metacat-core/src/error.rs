//! Error types for Metacat Core

use thiserror::Error;

/// Result type alias using Metacat's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog error taxonomy shared by every layer above the storage backend
#[derive(Error, Debug)]
pub enum Error {
    #[error("{entity_type} instance for {key} not found")]
    NotFound { entity_type: String, key: String },

    #[error("Entity already exists: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Entity is not empty: {0}")]
    NotEmpty(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            key: key.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether the error is a NotFound, used by callers that treat absence as a normal outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Recover an owned error from one shared by a cache loader
    pub fn from_shared(shared: std::sync::Arc<Error>) -> Self {
        match std::sync::Arc::try_unwrap(shared) {
            Ok(e) => e,
            Err(shared) => match shared.as_ref() {
                Self::NotFound { entity_type, key } => Self::NotFound {
                    entity_type: entity_type.clone(),
                    key: key.clone(),
                },
                Self::Conflict(msg) => Self::Conflict(msg.clone()),
                Self::InvalidArgument(msg) => Self::InvalidArgument(msg.clone()),
                Self::NotEmpty(msg) => Self::NotEmpty(msg.clone()),
                Self::PermissionDenied(msg) => Self::PermissionDenied(msg.clone()),
                Self::Storage(msg) => Self::Storage(msg.clone()),
                Self::Serialization(e) => Self::Internal(format!("Serialization error: {}", e)),
                Self::Internal(msg) => Self::Internal(msg.clone()),
            },
        }
    }

    /// Message for attempts to change a field that only the system may set
    pub fn read_only_attribute(entity_type: &str, field: &str) -> Self {
        Self::InvalidArgument(format!(
            "{} attribute {} can't be modified",
            entity_type, field
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("table", "svc.db.orders");
        assert_eq!(err.to_string(), "table instance for svc.db.orders not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_shared_keeps_kind() {
        let shared = std::sync::Arc::new(Error::not_found("table", "x"));
        let _other = shared.clone();
        assert!(Error::from_shared(shared).is_not_found());

        let unique = std::sync::Arc::new(Error::Conflict("dup".into()));
        assert!(matches!(Error::from_shared(unique), Error::Conflict(_)));
    }

    #[test]
    fn test_read_only_attribute() {
        let err = Error::read_only_attribute("table", "deleted");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("deleted"));
    }
}
