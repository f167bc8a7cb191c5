use thiserror::Error;

/// Error types for export operations
///
/// Only [`ExportError::UnknownKind`] and [`ExportError::LockPoisoned`] abort
/// a run. Everything else is scoped to the kind or entity that raised it
/// and ends up in the run report.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A kind that is not in the registry was referenced
    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    /// The remote API failed while serving a kind
    #[error("Remote API error for {kind}: {message}")]
    Remote { kind: String, message: String },

    /// An opaque remote value did not have the expected shape
    #[error("Cannot parse {kind} {id}: {message}")]
    StructuralParse {
        kind: String,
        id: String,
        message: String,
    },

    /// Selection inputs are not usable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Traversal state lock was poisoned by a panicking hook
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ExportError {
    /// Wrap a collaborator failure for a kind
    pub fn remote(kind: &str, err: impl std::fmt::Display) -> Self {
        ExportError::Remote {
            kind: kind.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn parse(kind: &str, id: &str, message: impl Into<String>) -> Self {
        ExportError::StructuralParse {
            kind: kind.to_string(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExportError::UnknownKind(_) | ExportError::LockPoisoned(_)
        )
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ExportError {
    fn from(err: serde_yaml::Error) -> Self {
        ExportError::InvalidConfig(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ExportError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ExportError::LockPoisoned(err.to_string())
    }
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ExportError::UnknownKind("x".into()).is_fatal());
        assert!(!ExportError::remote("databricks_job", "HTTP 503").is_fatal());
        assert!(!ExportError::parse("databricks_azure_adls_gen2_mount", "/mnt/a", "bad").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ExportError::parse("databricks_azure_adls_gen2_mount", "/mnt/a", "no match");
        assert_eq!(
            err.to_string(),
            "Cannot parse databricks_azure_adls_gen2_mount /mnt/a: no match"
        );
    }
}
